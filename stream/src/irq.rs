//! Demultiplexing of shared transfer-completion interrupt lines.
//!
//! A DMA block has far more channels than interrupt lines, so several channels
//! are routed to one line. The [`Dispatcher`] keeps a fixed table of
//! [`ChannelBinding`]s per line and, when the line fires, checks every bound
//! channel's status bit independently: more than one channel may be pending.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Handler invoked from interrupt context once per completion.
///
/// Runs with the line's interrupt active, so it must only flip flags.
pub type Callback = fn();

/// Per-channel status register access used by the [`Dispatcher`].
pub trait ChannelIrq {
    /// Number of channels; valid channel ids are `0..channels()`.
    fn channels(&self) -> u8;
    /// Route `channel`'s completion to `line`.
    fn enable(&self, line: u8, channel: u8);
    /// Whether `channel` has a completion pending on `line`.
    fn is_pending(&self, line: u8, channel: u8) -> bool;
    /// Clear `channel`'s pending status on `line`.
    fn acknowledge(&self, line: u8, channel: u8);
}

/// Single-writer/single-reader transfer completion flag.
///
/// The interrupt side only ever calls [`signal`](Self::signal). The foreground
/// polls it and clears it right before it hands the next buffer to hardware.
/// A freshly created flag reads as complete: nothing is in flight yet.
pub struct CompletionFlag {
    done: AtomicBool,
}

impl CompletionFlag {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(true),
        }
    }

    pub fn signal(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Mark a transfer as started.
    pub fn clear(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Spin until the transfer in flight completes.
    pub fn wait(&self) {
        while !self.is_complete() {
            spin_loop();
        }
    }
}

impl Default for CompletionFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelBinding {
    pub line: u8,
    pub channel: u8,
    pub callback: Callback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    NoCallback,
    NoSuchLine(u8),
    NoSuchChannel(u8),
    LineFull(u8),
    AlreadyBound { line: u8, channel: u8 },
}

/// Fixed-capacity `(line, channel) -> callback` registry.
///
/// `LINES` interrupt lines with room for `SLOTS` channels each. Bindings are
/// made during bring-up and never removed.
pub struct Dispatcher<const LINES: usize, const SLOTS: usize> {
    bindings: [[Option<ChannelBinding>; SLOTS]; LINES],
    len: [usize; LINES],
}

impl<const LINES: usize, const SLOTS: usize> Dispatcher<LINES, SLOTS> {
    pub const fn new() -> Self {
        Self {
            bindings: [[None; SLOTS]; LINES],
            len: [0; LINES],
        }
    }

    /// Bind `callback` to `channel` on `line` and enable the channel's
    /// interrupt on that line.
    ///
    /// Refusals are logged and leave the table untouched. A refused channel
    /// never reports completion, so callers treat an error here as fatal.
    pub fn register(
        &mut self,
        irq: &impl ChannelIrq,
        line: u8,
        channel: u8,
        callback: Option<Callback>,
    ) -> Result<(), RegisterError> {
        let Some(callback) = callback else {
            warn!("irq: no callback given for channel {} on line {}", channel, line);
            return Err(RegisterError::NoCallback);
        };
        let index = line as usize;
        if index >= LINES {
            warn!("irq: line {} does not exist", line);
            return Err(RegisterError::NoSuchLine(line));
        }
        if channel >= irq.channels() {
            warn!("irq: channel {} does not exist", channel);
            return Err(RegisterError::NoSuchChannel(channel));
        }
        if self.bound(line).any(|b| b.channel == channel) {
            warn!("irq: channel {} already bound on line {}", channel, line);
            return Err(RegisterError::AlreadyBound { line, channel });
        }
        let len = self.len[index];
        if len == SLOTS {
            error!("irq: line {} is full ({} channels)", line, SLOTS);
            return Err(RegisterError::LineFull(line));
        }

        self.bindings[index][len] = Some(ChannelBinding {
            line,
            channel,
            callback,
        });
        self.len[index] = len + 1;
        irq.enable(line, channel);
        debug!("irq: channel {} bound to line {}", channel, line);
        Ok(())
    }

    /// Service `line`. Every bound channel whose status bit is set gets
    /// acknowledged and then has its callback run exactly once.
    ///
    /// Returns the number of callbacks run.
    pub fn on_interrupt(&self, irq: &impl ChannelIrq, line: u8) -> usize {
        let mut serviced = 0;
        for binding in self.bound(line) {
            if irq.is_pending(line, binding.channel) {
                irq.acknowledge(line, binding.channel);
                (binding.callback)();
                serviced += 1;
            }
        }
        serviced
    }

    pub fn bound(&self, line: u8) -> impl Iterator<Item = &ChannelBinding> {
        let index = line as usize;
        let len = self.len.get(index).copied().unwrap_or(0);
        self.bindings
            .get(index)
            .into_iter()
            .flat_map(move |table| table[..len].iter().flatten())
    }
}

impl<const LINES: usize, const SLOTS: usize> Default for Dispatcher<LINES, SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}
