//! The cooperative loop tying loader, pool and scan-out together.
//!
//! One [`Pipeline::step`] runs one chunk of loading, then shows the due frame
//! if its slot is ready. Frames are shown strictly in order; a frame that is
//! late is waited for, never skipped or shown partially.

use crate::ConfigError;
use crate::loader::{BlockStorage, FrameLoader, LoadEvent};
use crate::pool::{FramePool, SlotState};
use crate::scanout::{DisplayLink, Scanout, ScanoutError};

/// Pause policy applied each time playback wraps back to frame 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Playback {
    /// Full passes between pauses; 0 never pauses.
    pub plays_before_pause: u32,
    pub pause_ms: u32,
}

impl Playback {
    pub const fn continuous() -> Self {
        Self {
            plays_before_pause: 0,
            pause_ms: 0,
        }
    }

    /// Short loops play twice before the pause, longer ones once.
    pub const fn for_frames(total_frames: u32) -> Self {
        Self {
            plays_before_pause: if total_frames <= 25 { 2 } else { 1 },
            pause_ms: 2000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// There are no frames to play.
    Empty,
    /// The due frame is not loaded yet.
    Waiting { frame: u32 },
    Shown {
        frame: u32,
        slot: usize,
        /// Set when this frame completed a pass and playback should pause.
        pause_ms: Option<u32>,
    },
    /// Scan-out refused the due frame.
    Rejected { frame: u32, error: ScanoutError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tick {
    pub load: LoadEvent,
    pub outcome: Outcome,
}

pub struct Pipeline<
    'a,
    S: BlockStorage,
    D,
    const BYTES: usize,
    const N: usize,
    const EXTENT: usize,
    const STAGE: usize,
    const DEPTH: usize,
> {
    pool: &'a mut FramePool<BYTES, N>,
    loader: FrameLoader<S>,
    scanout: Scanout<'a, D, EXTENT, STAGE, DEPTH>,
    playback: Playback,
    due_frame: u32,
    /// Slot holding the due frame: frames shown so far, mod `N`.
    due_slot: usize,
    shown: u64,
    plays: u32,
}

impl<
    'a,
    S: BlockStorage,
    D: DisplayLink,
    const BYTES: usize,
    const N: usize,
    const EXTENT: usize,
    const STAGE: usize,
    const DEPTH: usize,
> Pipeline<'a, S, D, BYTES, N, EXTENT, STAGE, DEPTH>
{
    /// Assign the initial loads for `total_frames` frames.
    pub fn new(
        pool: &'a mut FramePool<BYTES, N>,
        mut loader: FrameLoader<S>,
        scanout: Scanout<'a, D, EXTENT, STAGE, DEPTH>,
        total_frames: u32,
        playback: Playback,
    ) -> Result<Self, ConfigError> {
        if loader.geometry() != scanout.geometry() {
            return Err(ConfigError::GeometryMismatch);
        }
        loader.start(&mut *pool, total_frames)?;
        if total_frames == 0 {
            warn!("pipeline: no frames to play");
        }
        Ok(Self {
            pool,
            loader,
            scanout,
            playback,
            due_frame: 0,
            due_slot: 0,
            shown: 0,
            plays: 0,
        })
    }

    /// One loop iteration: load a chunk, then present the due frame if ready.
    pub fn step(&mut self) -> Tick {
        let load = self.advance_loader();
        let outcome = self.present();
        Tick { load, outcome }
    }

    /// Move one chunk unless a display transfer is in flight.
    pub fn advance_loader(&mut self) -> LoadEvent {
        self.loader.process(&mut *self.pool, self.scanout.is_busy())
    }

    /// Show the due frame if its slot is ready, then hand the slot back to
    /// the loader `N` frames ahead.
    pub fn present(&mut self) -> Outcome {
        let total = self.pool.total_frames();
        if total == 0 {
            return Outcome::Empty;
        }
        self.recover_failed_slots();

        let frame = self.due_frame;
        let slot = self.due_slot;
        let ready = self.pool.state_of(slot) == Some(SlotState::Ready)
            && self.pool.target_of(slot) == Some(frame);
        if !ready {
            return Outcome::Waiting { frame };
        }

        if let Err(error) = self.scanout.show_slot(&*self.pool, slot) {
            error!("pipeline: frame {} rejected: {:?}", frame, error);
            return Outcome::Rejected { frame, error };
        }

        let next = ((frame as u64 + N as u64) % total as u64) as u32;
        self.pool.mark_consumed(slot, next);
        self.shown += 1;
        self.due_frame = (frame + 1) % total;
        self.due_slot = (slot + 1) % N;
        trace!("pipeline: showed frame {} from slot {}", frame, slot);

        Outcome::Shown {
            frame,
            slot,
            pause_ms: self.pass_completed(),
        }
    }

    /// Draw into a slot the loader has no claim on and show it. Used for
    /// status screens when there is nothing to play.
    pub fn show_scratch(
        &mut self,
        slot: usize,
        draw: impl FnOnce(&mut [u8]),
    ) -> Result<(), ScanoutError> {
        let buffer = self
            .pool
            .scratch_mut(slot)
            .ok_or(ScanoutError::NotReady { slot })?;
        draw(buffer);
        self.scanout.show(buffer)
    }

    /// Give every failed slot back the frame it is expected to hold.
    fn recover_failed_slots(&mut self) {
        let total = self.pool.total_frames();
        for slot in 0..N {
            if self.pool.state_of(slot) != Some(SlotState::Invalid) {
                continue;
            }
            let ahead = (slot + N - self.due_slot) % N;
            let frame = ((self.due_frame as u64 + ahead as u64) % total as u64) as u32;
            self.loader.recover(&mut *self.pool, slot, frame);
        }
    }

    fn pass_completed(&mut self) -> Option<u32> {
        if self.due_frame != 0 || self.playback.plays_before_pause == 0 {
            return None;
        }
        self.plays += 1;
        if self.plays < self.playback.plays_before_pause {
            return None;
        }
        self.plays = 0;
        info!(
            "pipeline: {} passes done, pausing {} ms",
            self.playback.plays_before_pause, self.playback.pause_ms
        );
        Some(self.playback.pause_ms)
    }

    pub fn due_frame(&self) -> u32 {
        self.due_frame
    }

    pub fn due_slot(&self) -> usize {
        self.due_slot
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    pub fn total_frames(&self) -> u32 {
        self.pool.total_frames()
    }

    pub fn pool(&self) -> &FramePool<BYTES, N> {
        &*self.pool
    }

    pub fn loader(&self) -> &FrameLoader<S> {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut FrameLoader<S> {
        &mut self.loader
    }

    pub fn scanout(&self) -> &Scanout<'a, D, EXTENT, STAGE, DEPTH> {
        &self.scanout
    }

    pub fn scanout_mut(&mut self) -> &mut Scanout<'a, D, EXTENT, STAGE, DEPTH> {
        &mut self.scanout
    }
}
