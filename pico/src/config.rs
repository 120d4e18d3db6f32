//! Board and content constants.

use frame_stream::{Background, Fit, FrameGeometry, LoaderConfig, Packing, ScanoutConfig};

pub const PANEL_WIDTH: u16 = 466;
pub const PANEL_HEIGHT: u16 = 466;
/// The CO5300's visible area starts 6 columns into its RAM.
pub const PANEL_X_OFFSET: u16 = 6;
pub const PANEL_Y_OFFSET: u16 = 0;
pub const PANEL_SPI_HZ: u32 = 75_000_000;
/// Percent, mapped onto the panel's usable brightness range.
pub const PANEL_BRIGHTNESS: u8 = 95;

/// Frames are stored as raw big-endian RGB565.
pub const FRAME: FrameGeometry = FrameGeometry::new(233, 233, 2);
pub const FRAME_BYTES: usize = FRAME.frame_size();
pub const POOL_DEPTH: usize = 2;
/// Frames written to the card; capped by what the card actually holds.
pub const FRAME_COUNT: u32 = 3403;

pub const SECTOR_SIZE: u64 = 512;
/// Frames start after the partition table area, one per sector-aligned
/// stride.
pub const FIRST_FRAME_SECTOR: u64 = 2048;
pub const LOADER: LoaderConfig =
    LoaderConfig::new(FIRST_FRAME_SECTOR * SECTOR_SIZE, SECTOR_SIZE, 64 * 1024);
pub const SD_INIT_HZ: u32 = 400_000;
pub const SD_HZ: u32 = 25_000_000;

pub const SCALE_EXTENT: usize = 466;
pub const LINES_PER_TRANSFER: u16 = 16;
pub const STAGING_BYTES: usize = PANEL_WIDTH as usize * 2 * LINES_PER_TRANSFER as usize;
pub const STAGING_DEPTH: usize = 2;
pub const SCANOUT: ScanoutConfig = ScanoutConfig {
    panel_width: PANEL_WIDTH,
    panel_height: PANEL_HEIGHT,
    fit: Fit::Integer(2),
    packing: Packing::Copy { bytes_per_pixel: 2 },
    background: Background::BLACK_565,
    lines_per_transfer: LINES_PER_TRANSFER,
};

pub const TARGET_FPS: u64 = 30;
/// Interrupt line the panel's DMA completion is routed to. Line 0 belongs to
/// the HAL's own DMA driver.
pub const PANEL_IRQ_LINE: u8 = 1;
pub const ERROR_PATTERN_MS: u64 = 333;
