#![no_std]

pub mod config;
pub mod dma_irq;
pub mod panel;
pub mod player;
pub mod sdcard;

use frame_stream::CompletionFlag;

pub use panel::Co5300;
pub use sdcard::SdStorage;

/// Set from the DMA interrupt when the panel's transfer in flight completes.
pub static PANEL_DONE: CompletionFlag = CompletionFlag::new();

/// Microseconds since boot, for timing frame loads.
pub fn now_us() -> u64 {
    embassy_time::Instant::now().as_micros()
}
