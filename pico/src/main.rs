#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::block::ImageDef;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::spi::{Config as SpiConfig, Spi};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use frame_stream::{
    FrameLoader, FramePool, Pipeline, Playback, Scanout, Staging, frames_on_device,
};
use frame_stream_pico::panel::{self, Co5300};
use frame_stream_pico::{PANEL_DONE, SdStorage, config, dma_irq, now_us, player};
use static_cell::ConstStaticCell;
use {defmt_rtt as _, panic_probe as _};

#[unsafe(link_section = ".start_block")]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

// Program metadata for `picotool info`
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"frame-stream"),
    embassy_rp::binary_info::rp_program_description!(c"Streams raw RGB565 frames from SD card to a CO5300 panel"),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

static POOL: ConstStaticCell<FramePool<{ config::FRAME_BYTES }, { config::POOL_DEPTH }>> =
    ConstStaticCell::new(FramePool::new());
static STAGING: ConstStaticCell<Staging<{ config::STAGING_BYTES }, { config::STAGING_DEPTH }>> =
    ConstStaticCell::new(Staging::new());

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    info!("frame-stream starting");

    // Panel: SCLK 10, MOSI 11, DC 12, CS 13, RST 14, PWR 15.
    let _power = Output::new(p.PIN_15, Level::High);
    let mut reset = Output::new(p.PIN_14, Level::High);
    let spi = Spi::new_blocking_txonly(p.SPI1, p.PIN_10, p.PIN_11, panel::spi_config());
    let dc = Output::new(p.PIN_12, Level::Low);
    let cs = Output::new(p.PIN_13, Level::High);
    let mut display = Co5300::new(spi, dc, cs, p.DMA_CH1);
    display.init(&mut reset, config::PANEL_BRIGHTNESS).await;

    dma_irq::init();
    unwrap!(dma_irq::register(
        config::PANEL_IRQ_LINE,
        display.dma_channel(),
        Some(panel::on_transfer_done),
    ));

    // Card: SCK 2, MOSI 3, MISO 4, CS 5.
    let mut sd_config = SpiConfig::default();
    sd_config.frequency = config::SD_INIT_HZ;
    let sd_spi = Spi::new_blocking(p.SPI0, p.PIN_2, p.PIN_3, p.PIN_4, sd_config);
    let sd_cs = Output::new(p.PIN_5, Level::High);
    let sd_device = unwrap!(ExclusiveDevice::new(sd_spi, sd_cs, Delay));
    let card = SdCard::new(sd_device, Delay);
    let storage = SdStorage::new(card);

    let capacity = match storage.capacity() {
        Ok(bytes) => {
            info!("sd: {} MiB", bytes / (1024 * 1024));
            storage
                .device()
                .spi(|dev| dev.bus_mut().set_frequency(config::SD_HZ));
            bytes
        }
        Err(e) => {
            error!("sd: card unavailable: {:?}", Debug2Format(&e));
            0
        }
    };
    let frames = config::FRAME_COUNT.min(frames_on_device(capacity, &config::LOADER, config::FRAME));

    let loader = unwrap!(FrameLoader::new(storage, config::LOADER, config::FRAME)).with_clock(now_us);
    let scanout = unwrap!(Scanout::<
        _,
        { config::SCALE_EXTENT },
        { config::STAGING_BYTES },
        { config::STAGING_DEPTH },
    >::new(
        display,
        &PANEL_DONE,
        STAGING.take(),
        config::SCANOUT,
        config::FRAME,
    ));
    let pipeline = unwrap!(Pipeline::new(
        POOL.take(),
        loader,
        scanout,
        frames,
        Playback::for_frames(frames),
    ));

    player::run(pipeline).await
}
