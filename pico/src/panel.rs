//! CO5300 AMOLED controller on SPI1.
//!
//! Commands go out through blocking SPI writes. Pixel data is pushed by one
//! DMA channel paced by the SPI TX request line, with the chip select held
//! low from `RAMWR` until the last transfer of the frame has drained.

use core::hint::spin_loop;
use core::sync::atomic::{Ordering, compiler_fence};

use defmt::*;
use embassy_rp::{Peripheral, PeripheralRef};
use embassy_rp::dma::Channel;
use embassy_rp::gpio::Output;
use embassy_rp::pac;
use embassy_rp::pac::dma::regs::CtrlTrig;
use embassy_rp::pac::dma::vals::{DataSize, TreqSel};
use embassy_rp::peripherals::SPI1;
use embassy_rp::spi::{Blocking, Config as SpiConfig, Spi};
use embassy_time::Timer;
use frame_stream::{DisplayLink, Window};

use crate::config;

const SLPOUT: u8 = 0x11;
const INVOFF: u8 = 0x20;
const DISPON: u8 = 0x29;
const CASET: u8 = 0x2A;
const RASET: u8 = 0x2B;
const RAMWR: u8 = 0x2C;
const TEON: u8 = 0x35;
const MADCTL: u8 = 0x36;
const COLMOD: u8 = 0x3A;
const WRDISBV: u8 = 0x51;
const WRCTRLD: u8 = 0x53;

/// Command, parameters, delay afterwards in ms.
const INIT_SEQUENCE: &[(u8, &[u8], u64)] = &[
    (SLPOUT, &[], 120),
    // SPI mode control: single-lane writes
    (0xC4, &[0x80], 0),
    // tearing scan line
    (0x44, &[0x01, 0xD7], 0),
    (TEON, &[0x00], 0),
    (WRCTRLD, &[0x20], 10),
    (DISPON, &[], 10),
    (INVOFF, &[], 0),
    (MADCTL, &[0x00], 0),
    // 16 bits per pixel
    (COLMOD, &[0x55], 0),
];

/// Lowest `WRDISBV` value that still lights the panel.
const MIN_BRIGHTNESS: u16 = 0x25;

pub fn spi_config() -> SpiConfig {
    let mut config = SpiConfig::default();
    config.frequency = config::PANEL_SPI_HZ;
    config
}

pub struct Co5300<'d, C: Channel> {
    spi: Spi<'d, SPI1, Blocking>,
    dc: Output<'d>,
    cs: Output<'d>,
    dma: PeripheralRef<'d, C>,
    x_offset: u16,
    y_offset: u16,
}

impl<'d, C: Channel> Co5300<'d, C> {
    pub fn new(
        spi: Spi<'d, SPI1, Blocking>,
        dc: Output<'d>,
        cs: Output<'d>,
        dma: impl Peripheral<P = C> + 'd,
    ) -> Self {
        // Let the DMA channel pace itself on the TX FIFO.
        pac::SPI1.dmacr().modify(|w| w.set_txdmae(true));
        Self {
            spi,
            dc,
            cs,
            dma: dma.into_ref(),
            x_offset: config::PANEL_X_OFFSET,
            y_offset: config::PANEL_Y_OFFSET,
        }
    }

    /// Hardware reset, then wake the panel up in RGB565 mode.
    pub async fn init(&mut self, reset: &mut Output<'_>, brightness: u8) {
        reset.set_low();
        Timer::after_millis(100).await;
        reset.set_high();
        Timer::after_millis(100).await;

        for &(cmd, params, delay_ms) in INIT_SEQUENCE {
            self.command(cmd, params);
            if delay_ms > 0 {
                Timer::after_millis(delay_ms).await;
            }
        }
        self.set_brightness(brightness);
        info!("co5300: ready, dma channel {}", self.dma_channel());
    }

    pub fn dma_channel(&self) -> u8 {
        self.dma.number()
    }

    /// `percent` is clamped to 100.
    pub fn set_brightness(&mut self, percent: u8) {
        let level = MIN_BRIGHTNESS + percent.min(100) as u16 * (0xFF - MIN_BRIGHTNESS) / 100;
        self.command(WRDISBV, &[level as u8]);
    }

    fn command(&mut self, cmd: u8, params: &[u8]) {
        self.cs.set_low();
        self.dc.set_low();
        unwrap!(self.spi.blocking_write(&[cmd]));
        if !params.is_empty() {
            self.dc.set_high();
            unwrap!(self.spi.blocking_write(params));
        }
        self.cs.set_high();
    }

    fn wait_idle() {
        while pac::SPI1.sr().read().bsy() {
            spin_loop();
        }
    }
}

/// Transfer-complete callback for the panel's DMA channel. Only signals the
/// flag: the SPI FIFO may still be draining, which `end_frame` waits out.
pub fn on_transfer_done() {
    crate::PANEL_DONE.signal();
}

fn span(start: u16, end: u16) -> [u8; 4] {
    let [s0, s1] = start.to_be_bytes();
    let [e0, e1] = end.to_be_bytes();
    [s0, s1, e0, e1]
}

impl<C: Channel> DisplayLink for Co5300<'_, C> {
    fn set_output_rectangle(&mut self, window: Window) {
        self.command(CASET, &span(window.x0 + self.x_offset, window.x1 + self.x_offset));
        self.command(RASET, &span(window.y0 + self.y_offset, window.y1 + self.y_offset));
    }

    fn begin_frame(&mut self) {
        self.cs.set_low();
        self.dc.set_low();
        unwrap!(self.spi.blocking_write(&[RAMWR]));
        self.dc.set_high();
    }

    unsafe fn start_transfer(&mut self, data: &[u8]) {
        let ch = pac::DMA.ch(self.dma.number() as usize);
        ch.al1_ctrl().write(|c| {
            let mut t = CtrlTrig(*c);
            t.set_incr_read(true);
            t.set_incr_write(false);
            t.set_data_size(DataSize::SIZE_BYTE);
            t.set_treq_sel(TreqSel::SPI1_TX);
            t.set_irq_quiet(false);
            t.set_chain_to(self.dma.number());
            t.set_en(true);
            *c = t.0;
        });
        ch.write_addr().write(|c| *c = pac::SPI1.dr().as_ptr() as u32);
        ch.trans_count().write(|c| c.0 = data.len() as u32);
        // The staging writes must land before the channel starts reading.
        compiler_fence(Ordering::SeqCst);
        ch.al3_read_addr_trig().write(|c| *c = data.as_ptr() as u32);
    }

    fn end_frame(&mut self) {
        Self::wait_idle();
        // The RX side clocked in garbage during the pixel stream.
        while pac::SPI1.sr().read().rne() {
            let _ = pac::SPI1.dr().read();
        }
        pac::SPI1.icr().write(|w| w.set_roric(true));
        self.cs.set_high();
    }
}
