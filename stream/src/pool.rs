//! Whole-frame slots shared between the loader and the scan-out engine.
//!
//! Slot life cycle:
//!
//! ```text
//!   start/assign          commit (last byte)        mark_consumed
//! ------------> Loading ---------------------> Ready -------------> Loading
//!                  |
//!                  | invalidate (read failure)
//!                  v
//!               Invalid --assign--> Loading
//! ```
//!
//! Bytes are only written while a slot is `Loading` and only handed out for
//! display while it is `Ready`. Handing out a `&[u8]` borrows the pool, so a
//! slot cannot be recycled while its bytes are still being scanned out.

use crate::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameGeometry {
    pub width: u16,
    pub height: u16,
    pub bytes_per_pixel: u8,
}

impl FrameGeometry {
    pub const fn new(width: u16, height: u16, bytes_per_pixel: u8) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    pub const fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    pub const fn frame_size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.frame_size() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    Loading,
    Ready,
    Invalid,
}

pub struct FrameSlot<const BYTES: usize> {
    index: usize,
    target: Option<u32>,
    state: SlotState,
    bytes_loaded: usize,
    storage: [u8; BYTES],
}

impl<const BYTES: usize> FrameSlot<BYTES> {
    const EMPTY: Self = Self {
        index: 0,
        target: None,
        state: SlotState::Invalid,
        bytes_loaded: 0,
        storage: [0; BYTES],
    };

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn target(&self) -> Option<u32> {
        self.target
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn bytes_loaded(&self) -> usize {
        self.bytes_loaded
    }

    fn reset(&mut self, target: Option<u32>) {
        self.target = target;
        self.bytes_loaded = 0;
        self.state = match target {
            Some(_) => SlotState::Loading,
            None => SlotState::Invalid,
        };
    }
}

/// `N` slots of `BYTES` bytes each. Only the first `frame_size` bytes of a
/// slot are used once a geometry is configured.
pub struct FramePool<const BYTES: usize, const N: usize> {
    slots: [FrameSlot<BYTES>; N],
    geometry: FrameGeometry,
    total_frames: u32,
}

impl<const BYTES: usize, const N: usize> FramePool<BYTES, N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "a frame pool needs at least two slots");

        let mut slots = [const { FrameSlot::<BYTES>::EMPTY }; N];
        let mut i = 0;
        while i < N {
            slots[i].index = i;
            i += 1;
        }
        Self {
            slots,
            geometry: FrameGeometry::new(0, 0, 0),
            total_frames: 0,
        }
    }

    /// Set the frame geometry. Drops every assignment.
    pub fn configure(&mut self, geometry: FrameGeometry) -> Result<(), ConfigError> {
        if geometry.is_empty() {
            return Err(ConfigError::EmptyGeometry);
        }
        if geometry.frame_size() > BYTES {
            return Err(ConfigError::FrameTooLarge {
                needed: geometry.frame_size(),
                capacity: BYTES,
            });
        }
        self.geometry = geometry;
        self.start(0);
        Ok(())
    }

    /// Assign the initial targets: slot `i` loads frame `i mod total_frames`.
    ///
    /// With no frames every slot is left unassigned.
    pub fn start(&mut self, total_frames: u32) {
        self.total_frames = total_frames;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let target = (total_frames > 0).then(|| i as u32 % total_frames);
            slot.reset(target);
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn frame_size(&self) -> usize {
        self.geometry.frame_size()
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub const fn depth(&self) -> usize {
        N
    }

    pub fn slot(&self, slot: usize) -> Option<&FrameSlot<BYTES>> {
        self.slots.get(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &FrameSlot<BYTES>> {
        self.slots.iter()
    }

    pub fn target_of(&self, slot: usize) -> Option<u32> {
        self.slot(slot).and_then(FrameSlot::target)
    }

    pub fn state_of(&self, slot: usize) -> Option<SlotState> {
        self.slot(slot).map(FrameSlot::state)
    }

    /// Point `slot` at `frame` and restart its load from byte 0.
    pub fn assign(&mut self, slot: usize, frame: u32) {
        let total = self.total_frames;
        if let Some(s) = self.slots.get_mut(slot) {
            if total == 0 {
                s.reset(None);
            } else {
                s.reset(Some(frame % total));
            }
        }
    }

    /// Hand a displayed slot back to the loader with its next target.
    ///
    /// Only `Ready` slots can be consumed. Returns whether the slot was
    /// recycled.
    pub fn mark_consumed(&mut self, slot: usize, next_target: u32) -> bool {
        match self.state_of(slot) {
            Some(SlotState::Ready) => {
                self.assign(slot, next_target);
                true
            }
            state => {
                warn!("pool: slot {} consumed while {:?}", slot, state);
                false
            }
        }
    }

    /// The bytes of a fully loaded frame.
    pub fn ready_frame(&self, slot: usize) -> Option<&[u8]> {
        let size = self.frame_size();
        self.slot(slot)
            .filter(|s| s.state == SlotState::Ready)
            .map(|s| &s.storage[..size])
    }

    /// Writable storage of a slot the loader has no claim on.
    pub fn scratch_mut(&mut self, slot: usize) -> Option<&mut [u8]> {
        let size = self.frame_size();
        self.slots
            .get_mut(slot)
            .filter(|s| s.target.is_none())
            .map(|s| &mut s.storage[..size])
    }

    /// First slot at or after `from` (wrapping) that still has bytes to load.
    pub(crate) fn next_loading(&self, from: usize) -> Option<usize> {
        (0..N)
            .map(|k| (from + k) % N)
            .find(|&i| self.slots[i].state == SlotState::Loading && self.slots[i].target.is_some())
    }

    /// Target frame, fill offset and unfilled tail of a `Loading` slot.
    pub(crate) fn loading_window(&mut self, slot: usize) -> Option<(u32, usize, &mut [u8])> {
        let size = self.frame_size();
        let s = self.slots.get_mut(slot)?;
        if s.state != SlotState::Loading {
            return None;
        }
        let target = s.target?;
        let offset = s.bytes_loaded;
        Some((target, offset, &mut s.storage[offset..size]))
    }

    /// Account for `len` freshly written bytes. The slot becomes `Ready`
    /// exactly when the last byte of the frame lands.
    pub(crate) fn commit(&mut self, slot: usize, len: usize) -> SlotState {
        let size = self.frame_size();
        let Some(s) = self.slots.get_mut(slot) else {
            return SlotState::Invalid;
        };
        if s.state != SlotState::Loading {
            return s.state;
        }
        s.bytes_loaded = (s.bytes_loaded + len).min(size);
        if s.bytes_loaded == size {
            s.state = SlotState::Ready;
        }
        s.state
    }

    /// Drop a failed load. The slot waits for a fresh target.
    pub(crate) fn invalidate(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.reset(None);
        }
    }
}

impl<const BYTES: usize, const N: usize> Default for FramePool<BYTES, N> {
    fn default() -> Self {
        Self::new()
    }
}
