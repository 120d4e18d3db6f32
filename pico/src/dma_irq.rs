//! The DMA block's interrupt lines, shared by every channel routed to them.
//!
//! Line 0 is owned by the HAL's own DMA driver; channels we program by hand
//! report on lines 1 to 3 through a [`Dispatcher`].

use core::cell::RefCell;

use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::pac;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use frame_stream::{Callback, ChannelIrq, Dispatcher, RegisterError};

pub const LINES: usize = 4;
pub const SLOTS_PER_LINE: usize = 12;
/// Channels in the RP2350 DMA block; also bounds the `INTE`/`INTS` bit shifts.
pub const CHANNELS: u8 = 16;

static DISPATCHER: Mutex<CriticalSectionRawMutex, RefCell<Dispatcher<LINES, SLOTS_PER_LINE>>> =
    Mutex::new(RefCell::new(Dispatcher::new()));

/// `INTE`/`INTS` register pairs of the DMA block.
pub struct DmaIrqLines;

impl ChannelIrq for DmaIrqLines {
    fn channels(&self) -> u8 {
        CHANNELS
    }

    fn enable(&self, line: u8, channel: u8) {
        let bit = 1u32 << channel;
        // A channel reports on exactly one line.
        for other in (0..LINES).filter(|&l| l != line as usize) {
            pac::DMA.inte(other).modify(|v| *v &= !bit);
        }
        pac::DMA.ints(line as usize).write_value(bit);
        pac::DMA.inte(line as usize).modify(|v| *v |= bit);
    }

    fn is_pending(&self, line: u8, channel: u8) -> bool {
        pac::DMA.ints(line as usize).read() & (1 << channel) != 0
    }

    fn acknowledge(&self, line: u8, channel: u8) {
        // write-one-to-clear
        pac::DMA.ints(line as usize).write_value(1 << channel);
    }
}

/// Unmask lines 1 to 3 in the NVIC.
pub fn init() {
    for irq in [
        interrupt::DMA_IRQ_1,
        interrupt::DMA_IRQ_2,
        interrupt::DMA_IRQ_3,
    ] {
        irq.set_priority(Priority::P2);
        unsafe { irq.enable() };
    }
}

/// Route `channel` to `line` and run `callback` on each of its completions.
pub fn register(line: u8, channel: u8, callback: Option<Callback>) -> Result<(), RegisterError> {
    if line == 0 {
        return Err(RegisterError::NoSuchLine(line));
    }
    DISPATCHER.lock(|d| {
        d.borrow_mut()
            .register(&DmaIrqLines, line, channel, callback)
    })
}

fn service(line: u8) {
    DISPATCHER.lock(|d| {
        let d = d.borrow();
        d.on_interrupt(&DmaIrqLines, line);
        // Unbound channels would otherwise keep the line asserted.
        let bound = d.bound(line).fold(0u32, |m, b| m | 1 << b.channel);
        let stray = pac::DMA.ints(line as usize).read() & !bound;
        if stray != 0 {
            pac::DMA.ints(line as usize).write_value(stray);
        }
    });
}

#[interrupt]
fn DMA_IRQ_1() {
    service(1);
}

#[interrupt]
fn DMA_IRQ_2() {
    service(2);
}

#[interrupt]
fn DMA_IRQ_3() {
    service(3);
}
