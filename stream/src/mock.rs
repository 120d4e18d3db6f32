//! Test doubles for the hardware collaborators.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ops::Range;

use crate::irq::{Callback, ChannelIrq, CompletionFlag, Dispatcher};
use crate::loader::BlockStorage;
use crate::scale::Window;
use crate::scanout::DisplayLink;

/// Channel status bits kept in two sets per `(line, channel)`.
#[derive(Default)]
pub struct FakeIrq {
    enabled: RefCell<HashSet<(u8, u8)>>,
    pending: RefCell<HashSet<(u8, u8)>>,
}

impl FakeIrq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, line: u8, channel: u8) {
        self.pending.borrow_mut().insert((line, channel));
    }

    pub fn is_enabled(&self, line: u8, channel: u8) -> bool {
        self.enabled.borrow().contains(&(line, channel))
    }
}

impl ChannelIrq for FakeIrq {
    fn channels(&self) -> u8 {
        16
    }

    fn enable(&self, line: u8, channel: u8) {
        self.enabled.borrow_mut().insert((line, channel));
    }

    fn is_pending(&self, line: u8, channel: u8) -> bool {
        self.pending.borrow().contains(&(line, channel))
    }

    fn acknowledge(&self, line: u8, channel: u8) {
        self.pending.borrow_mut().remove(&(line, channel));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemError {
    Injected,
    OutOfRange,
}

struct Fault {
    range: Range<u64>,
    remaining: u32,
}

/// Byte-addressed storage backed by a `Vec`.
pub struct MemStorage<'a> {
    data: Vec<u8>,
    position: u64,
    faults: Vec<Fault>,
    watch: Option<&'a CompletionFlag>,
    pub seeks: Vec<u64>,
    pub skips: Vec<u64>,
    pub reads: Vec<(u64, usize)>,
    /// Reads issued while the watched transfer was still in flight.
    pub overlapped: usize,
}

impl<'a> MemStorage<'a> {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            faults: Vec::new(),
            watch: None,
            seeks: Vec::new(),
            skips: Vec::new(),
            reads: Vec::new(),
            overlapped: 0,
        }
    }

    /// Frames of `frame_size` bytes at `stride` intervals, every byte of frame
    /// `k` set to `k`.
    pub fn frames(count: u8, frame_size: usize, stride: usize) -> Self {
        let mut data = vec![0xEE; stride * (count as usize - 1) + frame_size];
        for k in 0..count as usize {
            data[k * stride..k * stride + frame_size].fill(k as u8);
        }
        Self::new(data)
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Fail the next `times` reads that start inside `range`.
    pub fn fail_at(mut self, range: Range<u64>, times: u32) -> Self {
        self.faults.push(Fault {
            range,
            remaining: times,
        });
        self
    }

    /// Count reads that start while `flag` reports a transfer in flight.
    pub fn watch(mut self, flag: &'a CompletionFlag) -> Self {
        self.watch = Some(flag);
        self
    }
}

impl BlockStorage for MemStorage<'_> {
    type Error = MemError;

    fn seek(&mut self, offset: u64) -> Result<(), MemError> {
        if offset > self.data.len() as u64 {
            return Err(MemError::OutOfRange);
        }
        self.seeks.push(offset);
        self.position = offset;
        Ok(())
    }

    fn skip(&mut self, bytes: u64) -> Result<(), MemError> {
        let to = self.position + bytes;
        if to > self.data.len() as u64 {
            return Err(MemError::OutOfRange);
        }
        self.skips.push(bytes);
        self.position = to;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize, MemError> {
        if self.watch.is_some_and(|flag| !flag.is_complete()) {
            self.overlapped += 1;
        }
        let at = self.position;
        self.reads.push((at, dst.len()));
        if let Some(fault) = self
            .faults
            .iter_mut()
            .find(|f| f.remaining > 0 && f.range.contains(&at))
        {
            fault.remaining -= 1;
            return Err(MemError::Injected);
        }
        let start = at as usize;
        let end = (start + dst.len()).min(self.data.len());
        let n = end.saturating_sub(start);
        dst[..n].copy_from_slice(&self.data[start..end]);
        self.position += n as u64;
        Ok(n)
    }
}

/// One `begin_frame .. end_frame` bracket seen by [`RecordingDisplay`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedFrame {
    pub window: Option<Window>,
    pub transfers: Vec<Vec<u8>>,
    pub ended: bool,
}

impl RecordedFrame {
    pub fn bytes(&self) -> Vec<u8> {
        self.transfers.concat()
    }
}

/// Display link that completes every transfer immediately by raising its
/// channel and running the dispatcher, as the DMA interrupt would.
pub struct RecordingDisplay {
    irq: FakeIrq,
    dispatcher: Dispatcher<1, 1>,
    window: Option<Window>,
    pub frames: Vec<RecordedFrame>,
    /// Transfers started without the completion flag being cleared first.
    pub overruns: usize,
    done: &'static CompletionFlag,
}

const LINE: u8 = 0;
const CHANNEL: u8 = 5;

impl RecordingDisplay {
    /// `on_done` must signal `done`, the flag the scan-out engine waits on.
    pub fn new(on_done: Callback, done: &'static CompletionFlag) -> Self {
        let irq = FakeIrq::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(&irq, LINE, CHANNEL, Some(on_done))
            .unwrap();
        Self {
            irq,
            dispatcher,
            window: None,
            frames: Vec::new(),
            overruns: 0,
            done,
        }
    }

    pub fn shown(&self) -> usize {
        self.frames.iter().filter(|f| f.ended).count()
    }
}

impl DisplayLink for RecordingDisplay {
    fn set_output_rectangle(&mut self, window: Window) {
        self.window = Some(window);
    }

    fn begin_frame(&mut self) {
        self.frames.push(RecordedFrame {
            window: self.window,
            ..RecordedFrame::default()
        });
    }

    unsafe fn start_transfer(&mut self, data: &[u8]) {
        if self.done.is_complete() {
            self.overruns += 1;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.transfers.push(data.to_vec());
        }
        self.irq.raise(LINE, CHANNEL);
        self.dispatcher.on_interrupt(&self.irq, LINE);
    }

    fn end_frame(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ended = true;
        }
    }
}

/// A fresh completion flag and the interrupt callback that signals it.
macro_rules! completion {
    () => {{
        static DONE: $crate::irq::CompletionFlag = $crate::irq::CompletionFlag::new();
        fn done() {
            DONE.signal();
        }
        (&DONE, done as $crate::irq::Callback)
    }};
}
pub(crate) use completion;
