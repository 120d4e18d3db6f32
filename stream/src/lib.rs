#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every other module.
mod fmt;

mod canvas;
mod irq;
mod loader;
mod packing;
mod pipeline;
mod pool;
mod scale;
mod scanout;

#[cfg(test)]
mod mock;

pub use canvas::Canvas;
pub use irq::{Callback, ChannelBinding, ChannelIrq, CompletionFlag, Dispatcher, RegisterError};
pub use loader::{
    BlockStorage, Clock, FrameLoader, LoadError, LoadEvent, LoadStats, LoaderConfig,
    frames_on_device,
};
pub use packing::{Background, Packing};
pub use pipeline::{Outcome, Pipeline, Playback, Tick};
pub use pool::{FrameGeometry, FramePool, FrameSlot, SlotState};
pub use scale::{Fit, Layout, ScaleMap, Window};
pub use scanout::{DisplayLink, Scanout, ScanoutConfig, ScanoutError, Staging};

/// Rejected static configuration. Raised once, when a component is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A frame dimension or the pixel size is zero.
    EmptyGeometry,
    /// One frame does not fit in a pool slot.
    FrameTooLarge { needed: usize, capacity: usize },
    /// The storage chunk size is zero.
    ZeroChunk,
    /// The frame alignment on the device is zero.
    ZeroAlignment,
    /// A panel dimension exceeds the capacity of the scaling tables.
    PanelTooLarge { extent: usize, capacity: usize },
    /// Integer upscaling with a factor of zero.
    ZeroScale,
    /// The frame's pixel size does not match what the packing consumes.
    PixelSizeMismatch { frame: usize, packing: usize },
    /// The background colour is not one output pixel wide.
    BackgroundSize { background: usize, pixel: usize },
    /// The loader and the scan-out engine disagree on the frame geometry.
    GeometryMismatch,
    /// Not even one output line fits in a staging buffer.
    StagingTooSmall { line_bytes: usize, capacity: usize },
}
