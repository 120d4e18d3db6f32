//! Incremental frame loading from block storage into the [`FramePool`].
//!
//! Frame `k` lives at `base_offset + k * stride` on the device, where the
//! stride is the frame size rounded up to the configured alignment. Every
//! call to [`FrameLoader::process`] moves at most one chunk, so the caller's
//! loop keeps its cadence no matter how slow the card is.

use crate::ConfigError;
use crate::pool::{FrameGeometry, FramePool, SlotState};

/// Sequential block device access.
///
/// `read` fills as much of `dst` as it can and may only come up short at the
/// end of the device.
pub trait BlockStorage {
    type Error;

    fn seek(&mut self, offset: u64) -> Result<(), Self::Error>;
    /// Move `bytes` forward from the current position, as if they had been
    /// read.
    fn skip(&mut self, bytes: u64) -> Result<(), Self::Error>;
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Self::Error>;
}

impl<T: BlockStorage + ?Sized> BlockStorage for &mut T {
    type Error = T::Error;

    fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        T::seek(self, offset)
    }

    fn skip(&mut self, bytes: u64) -> Result<(), Self::Error> {
        T::skip(self, bytes)
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Self::Error> {
        T::read(self, dst)
    }
}

/// Monotonic microsecond clock used to time frame loads.
pub type Clock = fn() -> u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoaderConfig {
    /// Device offset of frame 0.
    pub base_offset: u64,
    /// Frames start on multiples of this many bytes; 1 means packed.
    pub frame_alignment: u64,
    /// Upper bound on the bytes moved by one `process` call.
    pub chunk_size: usize,
}

impl LoaderConfig {
    pub const fn new(base_offset: u64, frame_alignment: u64, chunk_size: usize) -> Self {
        Self {
            base_offset,
            frame_alignment,
            chunk_size,
        }
    }

    /// Distance between the starts of consecutive frames on the device.
    pub const fn stride(&self, geometry: &FrameGeometry) -> u64 {
        let size = geometry.frame_size() as u64;
        if self.frame_alignment <= 1 {
            size
        } else {
            size.div_ceil(self.frame_alignment) * self.frame_alignment
        }
    }

    fn validate(&self, geometry: &FrameGeometry) -> Result<(), ConfigError> {
        if geometry.is_empty() {
            return Err(ConfigError::EmptyGeometry);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunk);
        }
        if self.frame_alignment == 0 {
            return Err(ConfigError::ZeroAlignment);
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new(0, 1, 64 * 1024)
    }
}

/// Number of whole frames a device of `capacity` bytes holds.
pub fn frames_on_device(capacity: u64, config: &LoaderConfig, geometry: FrameGeometry) -> u32 {
    if config.validate(&geometry).is_err() {
        return 0;
    }
    let size = geometry.frame_size() as u64;
    let Some(available) = capacity.checked_sub(config.base_offset) else {
        return 0;
    };
    if available < size {
        return 0;
    }
    let count = 1 + (available - size) / config.stride(&geometry);
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadError<E> {
    Storage(E),
    /// The device returned fewer bytes than a chunk asked for.
    ShortRead { expected: usize, got: usize },
}

/// What one [`FrameLoader::process`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadEvent {
    /// No slot needs loading.
    Idle,
    /// A display transfer is in flight; nothing was read.
    Deferred,
    Progress {
        slot: usize,
        frame: u32,
        bytes_loaded: usize,
    },
    Ready {
        slot: usize,
        frame: u32,
    },
    /// The chunk read failed and the slot was invalidated.
    Failed {
        slot: usize,
        frame: u32,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadStats {
    pub frames_loaded: u32,
    pub chunks_read: u32,
    pub seeks: u32,
    pub failures: u32,
    pub recoveries: u32,
    pub last_load_us: u32,
    pub avg_load_us: u32,
    samples: u32,
}

impl LoadStats {
    /// Plain mean over the first ten loads, 9:1 moving average after that.
    pub fn record_load_time(&mut self, us: u32) {
        self.last_load_us = us;
        if self.samples < 10 {
            let total = self.avg_load_us as u64 * self.samples as u64 + us as u64;
            self.samples += 1;
            self.avg_load_us = (total / self.samples as u64) as u32;
        } else {
            self.avg_load_us = ((self.avg_load_us as u64 * 9 + us as u64) / 10) as u32;
        }
    }
}

pub struct FrameLoader<S: BlockStorage> {
    storage: S,
    config: LoaderConfig,
    geometry: FrameGeometry,
    stride: u64,
    /// Slot currently being filled. Only one load is in progress at a time.
    active: Option<usize>,
    /// Where the next slot search starts, so slots are served in turn.
    next_slot: usize,
    /// Device position after the last successful read, if known.
    cursor: Option<u64>,
    clock: Option<Clock>,
    load_started: u64,
    stats: LoadStats,
    last_error: Option<LoadError<S::Error>>,
}

impl<S: BlockStorage> FrameLoader<S> {
    pub fn new(
        storage: S,
        config: LoaderConfig,
        geometry: FrameGeometry,
    ) -> Result<Self, ConfigError> {
        config.validate(&geometry)?;
        Ok(Self {
            storage,
            config,
            geometry,
            stride: config.stride(&geometry),
            active: None,
            next_slot: 0,
            cursor: None,
            clock: None,
            load_started: 0,
            stats: LoadStats::default(),
            last_error: None,
        })
    }

    /// Time frame loads with `clock`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Size `pool` for this loader's frames and assign the initial targets.
    pub fn start<const BYTES: usize, const N: usize>(
        &mut self,
        pool: &mut FramePool<BYTES, N>,
        total_frames: u32,
    ) -> Result<(), ConfigError> {
        pool.configure(self.geometry)?;
        pool.start(total_frames);
        self.active = None;
        self.next_slot = 0;
        self.cursor = None;
        info!(
            "loader: {} frames of {} bytes, stride {}, first at {}",
            total_frames,
            self.geometry.frame_size(),
            self.stride,
            self.config.base_offset
        );
        Ok(())
    }

    /// Move at most one chunk into the slot being loaded.
    ///
    /// Nothing is read while `transfer_busy` is set: the display transfer and
    /// the storage read share the same bus fabric.
    pub fn process<const BYTES: usize, const N: usize>(
        &mut self,
        pool: &mut FramePool<BYTES, N>,
        transfer_busy: bool,
    ) -> LoadEvent {
        let active = self
            .active
            .filter(|&slot| pool.state_of(slot) == Some(SlotState::Loading))
            .or_else(|| pool.next_loading(self.next_slot));
        let Some(slot) = active else {
            self.active = None;
            return LoadEvent::Idle;
        };
        self.active = Some(slot);
        if transfer_busy {
            return LoadEvent::Deferred;
        }

        let Some((frame, offset, tail)) = pool.loading_window(slot) else {
            self.active = None;
            return LoadEvent::Idle;
        };
        let len = tail.len().min(self.config.chunk_size);
        let position = self.config.base_offset + frame as u64 * self.stride + offset as u64;

        if offset == 0 {
            trace!("loader: slot {} <- frame {} at {}", slot, frame, position);
            self.load_started = self.now();
        }

        let read = self.read_chunk(position, &mut tail[..len]);
        match read {
            Ok(()) => {
                self.cursor = Some(position + len as u64);
                self.stats.chunks_read += 1;
                match pool.commit(slot, len) {
                    SlotState::Ready => {
                        self.finish(slot, frame);
                        LoadEvent::Ready { slot, frame }
                    }
                    _ => LoadEvent::Progress {
                        slot,
                        frame,
                        bytes_loaded: offset + len,
                    },
                }
            }
            Err(e) => {
                warn!(
                    "loader: frame {} failed at byte {} (slot {})",
                    frame, offset, slot
                );
                self.cursor = None;
                self.active = None;
                self.next_slot = slot;
                self.stats.failures += 1;
                self.last_error = Some(e);
                pool.invalidate(slot);
                LoadEvent::Failed { slot, frame }
            }
        }
    }

    /// Give a failed slot its frame back so the load is retried.
    pub fn recover<const BYTES: usize, const N: usize>(
        &mut self,
        pool: &mut FramePool<BYTES, N>,
        slot: usize,
        frame: u32,
    ) {
        if pool.state_of(slot) != Some(SlotState::Invalid) {
            return;
        }
        pool.assign(slot, frame);
        self.stats.recoveries += 1;
        warn!("loader: retrying frame {} in slot {}", frame, slot);
    }

    fn read_chunk(&mut self, position: u64, dst: &mut [u8]) -> Result<(), LoadError<S::Error>> {
        match self.cursor {
            Some(cursor) if cursor == position => {}
            // Alignment padding after the previous frame.
            Some(cursor) if cursor < position && position - cursor < self.stride => {
                self.storage
                    .skip(position - cursor)
                    .map_err(LoadError::Storage)?;
            }
            _ => {
                self.storage.seek(position).map_err(LoadError::Storage)?;
                self.stats.seeks += 1;
            }
        }
        let got = self.storage.read(dst).map_err(LoadError::Storage)?;
        if got != dst.len() {
            return Err(LoadError::ShortRead {
                expected: dst.len(),
                got,
            });
        }
        Ok(())
    }

    fn finish(&mut self, slot: usize, frame: u32) {
        self.active = None;
        self.next_slot = slot + 1;
        self.stats.frames_loaded += 1;
        if self.clock.is_some() {
            let elapsed = self.now().saturating_sub(self.load_started);
            self.stats
                .record_load_time(u32::try_from(elapsed).unwrap_or(u32::MAX));
        }
        debug!(
            "loader: frame {} ready in slot {} ({} us)",
            frame, slot, self.stats.last_load_us
        );
    }

    fn now(&self) -> u64 {
        self.clock.map_or(0, |clock| clock())
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Slot being filled, if any.
    pub fn active_slot(&self) -> Option<usize> {
        self.active
    }

    pub fn last_error(&self) -> Option<&LoadError<S::Error>> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<LoadError<S::Error>> {
        self.last_error.take()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemError, MemStorage};
    use std::sync::atomic::{AtomicU64, Ordering};

    const GEOMETRY: FrameGeometry = FrameGeometry::new(4, 4, 2);
    const SIZE: usize = GEOMETRY.frame_size();

    fn loader(storage: MemStorage<'_>, chunk: usize) -> FrameLoader<MemStorage<'_>> {
        FrameLoader::new(storage, LoaderConfig::new(0, 1, chunk), GEOMETRY).unwrap()
    }

    fn run_until_ready<S: BlockStorage>(
        loader: &mut FrameLoader<S>,
        pool: &mut FramePool<64, 2>,
    ) -> (usize, u32) {
        for _ in 0..100 {
            if let LoadEvent::Ready { slot, frame } = loader.process(pool, false) {
                return (slot, frame);
            }
        }
        panic!("no frame became ready");
    }

    #[test]
    fn stride_rounds_up_to_alignment() {
        let config = LoaderConfig::new(2048 * 512, 512, 64 * 1024);
        let geometry = FrameGeometry::new(233, 233, 2);
        assert_eq!(geometry.frame_size(), 108_578);
        assert_eq!(config.stride(&geometry), 213 * 512);
        assert_eq!(LoaderConfig::default().stride(&geometry), 108_578);
    }

    #[test]
    fn counts_whole_frames_on_the_device() {
        let config = LoaderConfig::new(100, 64, 16);
        // 32-byte frames on a 64-byte stride; the last frame needs no padding.
        assert_eq!(frames_on_device(100, &config, GEOMETRY), 0);
        assert_eq!(frames_on_device(131, &config, GEOMETRY), 0);
        assert_eq!(frames_on_device(132, &config, GEOMETRY), 1);
        assert_eq!(frames_on_device(100 + 64 * 2 + 32, &config, GEOMETRY), 3);
        assert_eq!(frames_on_device(50, &config, GEOMETRY), 0);
    }

    #[test]
    fn rejects_bad_configuration() {
        let storage = || MemStorage::new(vec![0; 64]);
        assert!(matches!(
            FrameLoader::new(storage(), LoaderConfig::new(0, 1, 0), GEOMETRY),
            Err(ConfigError::ZeroChunk)
        ));
        assert!(matches!(
            FrameLoader::new(storage(), LoaderConfig::new(0, 0, 8), GEOMETRY),
            Err(ConfigError::ZeroAlignment)
        ));
        assert!(matches!(
            FrameLoader::new(storage(), LoaderConfig::default(), FrameGeometry::new(4, 0, 2)),
            Err(ConfigError::EmptyGeometry)
        ));
    }

    #[test]
    fn fills_one_chunk_per_call_until_ready() {
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::frames(3, SIZE, SIZE), 12);
        loader.start(&mut pool, 3).unwrap();

        let mut seen = Vec::new();
        loop {
            let event = loader.process(&mut pool, false);
            let loaded = pool.slot(0).unwrap().bytes_loaded();
            assert!(pool.state_of(0) != Some(SlotState::Ready) || loaded == SIZE);
            seen.push(event);
            if matches!(event, LoadEvent::Ready { .. }) {
                break;
            }
        }
        assert_eq!(
            seen,
            [
                LoadEvent::Progress { slot: 0, frame: 0, bytes_loaded: 12 },
                LoadEvent::Progress { slot: 0, frame: 0, bytes_loaded: 24 },
                LoadEvent::Ready { slot: 0, frame: 0 },
            ]
        );
        assert_eq!(loader.storage().reads, [(0, 12), (12, 12), (24, 8)]);
        assert_eq!(pool.ready_frame(0), Some(&[0u8; SIZE][..]));
    }

    #[test]
    fn sequential_frames_share_one_seek() {
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::frames(3, SIZE, SIZE), 64);
        loader.start(&mut pool, 3).unwrap();

        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 0));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (1, 1));
        assert_eq!(loader.storage().seeks, [0]);
        assert_eq!(loader.stats().seeks, 1);

        // Wrapping back to frame 0 needs an explicit seek.
        assert!(pool.mark_consumed(0, 2));
        assert!(pool.mark_consumed(1, 0));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 2));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (1, 0));
        assert_eq!(loader.storage().seeks, [0, 0]);
        assert_eq!(pool.ready_frame(0), Some(&[2u8; SIZE][..]));
        assert_eq!(loader.stats().frames_loaded, 4);
    }

    #[test]
    fn alignment_padding_is_skipped_not_seeked() {
        // 32-byte frames on a 48-byte stride.
        let config = LoaderConfig::new(0, 48, 64);
        let mut pool = FramePool::<64, 2>::new();
        let storage = MemStorage::frames(4, SIZE, 48);
        let mut loader = FrameLoader::new(storage, config, GEOMETRY).unwrap();
        loader.start(&mut pool, 4).unwrap();

        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 0));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (1, 1));
        assert!(pool.mark_consumed(0, 2));
        assert!(pool.mark_consumed(1, 3));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 2));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (1, 3));

        assert_eq!(loader.storage().seeks, [0]);
        assert_eq!(loader.storage().skips, [16, 16, 16]);
        assert_eq!(loader.stats().seeks, 1);
        assert_eq!(loader.storage().reads, [(0, SIZE), (48, SIZE), (96, SIZE), (144, SIZE)]);
        assert_eq!(pool.ready_frame(1), Some(&[3u8; SIZE][..]));

        // Wrapping around is a real change of position.
        assert!(pool.mark_consumed(0, 0));
        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 0));
        assert_eq!(loader.storage().seeks, [0, 0]);
    }

    #[test]
    fn never_reads_while_a_transfer_is_in_flight() {
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::frames(2, SIZE, SIZE), 8);
        loader.start(&mut pool, 2).unwrap();

        for _ in 0..5 {
            assert_eq!(loader.process(&mut pool, true), LoadEvent::Deferred);
        }
        assert!(loader.storage().reads.is_empty());
        assert_eq!(
            loader.process(&mut pool, false),
            LoadEvent::Progress { slot: 0, frame: 0, bytes_loaded: 8 }
        );
    }

    #[test]
    fn idle_once_every_slot_is_ready() {
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::frames(2, SIZE, SIZE), 64);
        loader.start(&mut pool, 2).unwrap();
        run_until_ready(&mut loader, &mut pool);
        run_until_ready(&mut loader, &mut pool);
        assert_eq!(loader.process(&mut pool, false), LoadEvent::Idle);
        assert_eq!(loader.process(&mut pool, true), LoadEvent::Idle);
    }

    #[test]
    fn honours_base_offset_and_stride() {
        let mut data = vec![0xAA; 16];
        data.extend(MemStorage::frames(2, SIZE, 48).into_data());
        let config = LoaderConfig::new(16, 48, 64);
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = FrameLoader::new(MemStorage::new(data), config, GEOMETRY).unwrap();
        loader.start(&mut pool, 2).unwrap();

        run_until_ready(&mut loader, &mut pool);
        run_until_ready(&mut loader, &mut pool);
        assert_eq!(loader.storage().reads, [(16, SIZE), (64, SIZE)]);
        assert_eq!(pool.ready_frame(1), Some(&[1u8; SIZE][..]));
    }

    #[test]
    fn failed_read_invalidates_and_recovers() {
        let storage = MemStorage::frames(3, SIZE, SIZE).fail_at(2 * SIZE as u64..3 * SIZE as u64, 1);
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(storage, 64);
        loader.start(&mut pool, 3).unwrap();
        run_until_ready(&mut loader, &mut pool);
        run_until_ready(&mut loader, &mut pool);

        assert!(pool.mark_consumed(0, 2));
        assert_eq!(loader.process(&mut pool, false), LoadEvent::Failed { slot: 0, frame: 2 });
        assert_eq!(pool.state_of(0), Some(SlotState::Invalid));
        assert_eq!(pool.target_of(0), None);
        assert_eq!(loader.take_error(), Some(LoadError::Storage(MemError::Injected)));
        assert_eq!(loader.process(&mut pool, false), LoadEvent::Idle);

        loader.recover(&mut pool, 0, 2);
        assert_eq!(run_until_ready(&mut loader, &mut pool), (0, 2));
        assert_eq!(pool.ready_frame(0), Some(&[2u8; SIZE][..]));
        assert_eq!(loader.stats().failures, 1);
        assert_eq!(loader.stats().recoveries, 1);
    }

    #[test]
    fn short_read_is_a_failure() {
        // Only half of frame 1 exists on the device.
        let storage = MemStorage::new(vec![7; SIZE + SIZE / 2]);
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(storage, 64);
        loader.start(&mut pool, 2).unwrap();
        run_until_ready(&mut loader, &mut pool);

        assert_eq!(loader.process(&mut pool, false), LoadEvent::Failed { slot: 1, frame: 1 });
        assert_eq!(
            loader.last_error(),
            Some(&LoadError::ShortRead { expected: SIZE, got: SIZE / 2 })
        );
        assert!(pool.ready_frame(1).is_none());
    }

    #[test]
    fn zero_frames_leave_the_loader_idle() {
        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::new(Vec::new()), 64);
        loader.start(&mut pool, 0).unwrap();
        assert_eq!(loader.process(&mut pool, false), LoadEvent::Idle);
        assert!(loader.storage().reads.is_empty());
    }

    #[test]
    fn times_loads_with_the_given_clock() {
        static NOW: AtomicU64 = AtomicU64::new(0);
        fn tick() -> u64 {
            NOW.fetch_add(500, Ordering::SeqCst)
        }

        let mut pool = FramePool::<64, 2>::new();
        let mut loader = loader(MemStorage::frames(2, SIZE, SIZE), 16).with_clock(tick);
        loader.start(&mut pool, 2).unwrap();
        run_until_ready(&mut loader, &mut pool);
        assert_eq!(loader.stats().last_load_us, 500);
        assert_eq!(loader.stats().avg_load_us, 500);
    }

    #[test]
    fn load_time_average_switches_to_moving_average() {
        let mut stats = LoadStats::default();
        for us in [100, 200, 300] {
            stats.record_load_time(us);
        }
        assert_eq!(stats.avg_load_us, 200);
        for _ in 0..7 {
            stats.record_load_time(200);
        }
        assert_eq!(stats.avg_load_us, 200);
        stats.record_load_time(1200);
        assert_eq!(stats.avg_load_us, 300);
        assert_eq!(stats.last_load_us, 1200);
    }
}
