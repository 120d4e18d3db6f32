//! Frame scan-out through ping-pong staging buffers.
//!
//! The engine walks the output window line by line, scales each line into a
//! staging buffer and hands full buffers to the [`DisplayLink`]. Only one
//! transfer is ever in flight; while it runs the CPU fills the next buffer.
//! The sole blocking point is the wait on the [`CompletionFlag`] before the
//! next transfer starts.

use crate::ConfigError;
use crate::irq::CompletionFlag;
use crate::packing::{Background, Packing};
use crate::pool::{FrameGeometry, FramePool};
use crate::scale::{Fit, Layout, ScaleMap, Window};

/// Display-side collaborator.
pub trait DisplayLink {
    /// Program the panel rectangle the following transfers fill.
    fn set_output_rectangle(&mut self, window: Window);
    fn begin_frame(&mut self);
    /// Start an asynchronous transfer of `data`. Completion is reported
    /// through the interrupt dispatcher, never through a return value.
    ///
    /// # Safety
    ///
    /// The hardware reads `data` after this call returns. The caller must
    /// leave it alive and unmodified until completion is signalled.
    unsafe fn start_transfer(&mut self, data: &[u8]);
    /// Close the frame once its last transfer has completed.
    fn end_frame(&mut self);
}

impl<T: DisplayLink + ?Sized> DisplayLink for &mut T {
    fn set_output_rectangle(&mut self, window: Window) {
        T::set_output_rectangle(self, window)
    }

    fn begin_frame(&mut self) {
        T::begin_frame(self)
    }

    unsafe fn start_transfer(&mut self, data: &[u8]) {
        unsafe { T::start_transfer(self, data) }
    }

    fn end_frame(&mut self) {
        T::end_frame(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanoutConfig {
    pub panel_width: u16,
    pub panel_height: u16,
    pub fit: Fit,
    pub packing: Packing,
    pub background: Background,
    /// Output lines per hardware transfer; clamped to what a staging buffer
    /// holds.
    pub lines_per_transfer: u16,
}

impl Default for ScanoutConfig {
    fn default() -> Self {
        Self {
            panel_width: 466,
            panel_height: 466,
            fit: Fit::Integer(2),
            packing: Packing::default(),
            background: Background::default(),
            lines_per_transfer: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanoutError {
    EmptyFrame,
    FrameSize { expected: usize, got: usize },
    NotReady { slot: usize },
}

/// `DEPTH` staging buffers of `BYTES` bytes each.
pub struct Staging<const BYTES: usize, const DEPTH: usize> {
    buffers: [[u8; BYTES]; DEPTH],
}

impl<const BYTES: usize, const DEPTH: usize> Staging<BYTES, DEPTH> {
    pub const fn new() -> Self {
        assert!(DEPTH >= 2, "scan-out needs at least two staging buffers");
        Self {
            buffers: [[0; BYTES]; DEPTH],
        }
    }
}

impl<const BYTES: usize, const DEPTH: usize> Default for Staging<BYTES, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Scanout<'a, D, const EXTENT: usize, const BYTES: usize, const DEPTH: usize> {
    display: D,
    done: &'a CompletionFlag,
    staging: &'a mut Staging<BYTES, DEPTH>,
    layout: Layout<EXTENT>,
    geometry: FrameGeometry,
    packing: Packing,
    background: Background,
    line_bytes: usize,
    lines_per_transfer: usize,
    frames_shown: u32,
}

impl<'a, D, const EXTENT: usize, const BYTES: usize, const DEPTH: usize>
    Scanout<'a, D, EXTENT, BYTES, DEPTH>
where
    D: DisplayLink,
{
    /// `done` must be the flag the display's transfer-complete callback
    /// signals.
    pub fn new(
        display: D,
        done: &'a CompletionFlag,
        staging: &'a mut Staging<BYTES, DEPTH>,
        config: ScanoutConfig,
        geometry: FrameGeometry,
    ) -> Result<Self, ConfigError> {
        let packing = config.packing;
        if packing.source_bytes() != geometry.bytes_per_pixel as usize {
            return Err(ConfigError::PixelSizeMismatch {
                frame: geometry.bytes_per_pixel as usize,
                packing: packing.source_bytes(),
            });
        }
        if config.background.as_bytes().len() != packing.output_bytes() {
            return Err(ConfigError::BackgroundSize {
                background: config.background.as_bytes().len(),
                pixel: packing.output_bytes(),
            });
        }
        let layout = Layout::plan(config.panel_width, config.panel_height, geometry, config.fit)?;
        let line_bytes = layout.width() * packing.output_bytes();
        if line_bytes > BYTES {
            return Err(ConfigError::StagingTooSmall {
                line_bytes,
                capacity: BYTES,
            });
        }
        let lines_per_transfer = (config.lines_per_transfer.max(1) as usize).min(BYTES / line_bytes);
        info!(
            "scanout: {}x{} window, {} lines x {} bytes per transfer, {} buffers",
            layout.width(),
            layout.height(),
            lines_per_transfer,
            line_bytes,
            DEPTH
        );

        Ok(Self {
            display,
            done,
            staging,
            layout,
            geometry,
            packing,
            background: config.background,
            line_bytes,
            lines_per_transfer,
            frames_shown: 0,
        })
    }

    /// A transfer is in flight on the shared fabric.
    pub fn is_busy(&self) -> bool {
        !self.done.is_complete()
    }

    /// Emit the `Ready` frame held by `slot`.
    pub fn show_slot<const B: usize, const N: usize>(
        &mut self,
        pool: &FramePool<B, N>,
        slot: usize,
    ) -> Result<(), ScanoutError> {
        let frame = pool.ready_frame(slot).ok_or(ScanoutError::NotReady { slot })?;
        self.show(frame)
    }

    /// Emit one whole frame. Returns once the last transfer has completed.
    ///
    /// Contract violations are rejected before any command reaches the panel.
    pub fn show(&mut self, frame: &[u8]) -> Result<(), ScanoutError> {
        if frame.is_empty() {
            error!("scanout: empty frame");
            return Err(ScanoutError::EmptyFrame);
        }
        let expected = self.geometry.frame_size();
        if frame.len() != expected {
            error!("scanout: frame is {} bytes, expected {}", frame.len(), expected);
            return Err(ScanoutError::FrameSize {
                expected,
                got: frame.len(),
            });
        }

        self.display.set_output_rectangle(self.layout.window);
        self.display.begin_frame();

        let height = self.layout.height();
        let mut current = 0;
        let mut previous_lines = 0;
        let mut y = 0;
        while y < height {
            let lines = self.lines_per_transfer.min(height - y);
            let previous = (current + DEPTH - 1) % DEPTH;
            self.fill(frame, current, previous, previous_lines, y, lines);

            self.done.wait();
            self.done.clear();
            let data = &self.staging.buffers[current][..lines * self.line_bytes];
            // SAFETY: a buffer is refilled only after DEPTH - 1 later
            // transfers were started, each of which waited for the one
            // before it to complete.
            unsafe { self.display.start_transfer(data) };

            previous_lines = lines;
            current = (current + 1) % DEPTH;
            y += lines;
        }

        self.done.wait();
        self.display.end_frame();
        self.frames_shown = self.frames_shown.wrapping_add(1);
        Ok(())
    }

    /// Fill `lines` output lines starting at `y` into staging buffer
    /// `current`. `previous` holds the `previous_lines` lines before `y`.
    fn fill(
        &mut self,
        frame: &[u8],
        current: usize,
        previous: usize,
        previous_lines: usize,
        y: usize,
        lines: usize,
    ) {
        let line_bytes = self.line_bytes;
        let row_bytes = self.geometry.row_bytes();
        let layout = &self.layout;
        let (dst, prev) = split_pair(&mut self.staging.buffers, current, previous);

        for i in 0..lines {
            let row = y + i;
            let at = i * line_bytes;
            if layout.rows.repeats_previous(row) {
                if i > 0 {
                    dst.copy_within(at - line_bytes..at, at);
                    continue;
                }
                if previous_lines > 0 {
                    let from = (previous_lines - 1) * line_bytes;
                    dst[..line_bytes].copy_from_slice(&prev[from..from + line_bytes]);
                    continue;
                }
            }
            let line = &mut dst[at..at + line_bytes];
            match layout.rows.source_of(row) {
                Some(source_row) => {
                    let src = &frame[source_row * row_bytes..][..row_bytes];
                    scale_row(&layout.columns, self.packing, &self.background, src, line);
                }
                None => self.background.fill(line),
            }
        }
    }

    pub fn layout(&self) -> &Layout<EXTENT> {
        &self.layout
    }

    pub fn window(&self) -> Window {
        self.layout.window
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn lines_per_transfer(&self) -> usize {
        self.lines_per_transfer
    }

    pub fn frames_shown(&self) -> u32 {
        self.frames_shown
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }
}

/// Scale and pack one source row into an output line.
fn scale_row<const EXTENT: usize>(
    columns: &ScaleMap<EXTENT>,
    packing: Packing,
    background: &Background,
    src: &[u8],
    line: &mut [u8],
) {
    let sb = packing.source_bytes();
    if let Some(start) = columns.contiguous_start() {
        packing.pack_run(&src[start * sb..(start + columns.len()) * sb], line);
        return;
    }

    let background = background.as_bytes();
    for (&sx, out) in columns
        .entries()
        .iter()
        .zip(line.chunks_exact_mut(packing.output_bytes()))
    {
        if sx == ScaleMap::<EXTENT>::OUTSIDE {
            out.copy_from_slice(background);
        } else {
            let sx = sx as usize * sb;
            packing.pack(&src[sx..sx + sb], out);
        }
    }
}

/// Mutable access to buffer `a` alongside shared access to buffer `b`.
fn split_pair<const BYTES: usize>(
    buffers: &mut [[u8; BYTES]],
    a: usize,
    b: usize,
) -> (&mut [u8; BYTES], &[u8; BYTES]) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = buffers.split_at_mut(b);
        (&mut lo[a], &hi[0])
    } else {
        let (lo, hi) = buffers.split_at_mut(a);
        (&mut hi[0], &lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingDisplay, completion};
    use embedded_graphics::pixelcolor::{Rgb565, RgbColor};

    fn config(w: u16, h: u16, fit: Fit, lines: u16) -> ScanoutConfig {
        ScanoutConfig {
            panel_width: w,
            panel_height: h,
            fit,
            packing: Packing::Copy { bytes_per_pixel: 2 },
            background: Background::from_bytes(&[0xBB, 0xBB]),
            lines_per_transfer: lines,
        }
    }

    /// 16-bit pixels whose two bytes are `(row, column)`.
    fn numbered(w: u16, h: u16) -> Vec<u8> {
        (0..h)
            .flat_map(|y| (0..w).flat_map(move |x| [y as u8, x as u8]))
            .collect()
    }

    #[test]
    fn native_window_is_centered_and_copied_verbatim() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<64, 2>::new();
        let geometry = FrameGeometry::new(3, 3, 2);
        let mut scanout: Scanout<'_, _, 8, 64, 2> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(7, 7, Fit::Native, 1),
            geometry,
        )
        .unwrap();

        let frame = numbered(3, 3);
        scanout.show(&frame).unwrap();
        let shown = &scanout.display().frames[0];
        assert_eq!(shown.window, Some(Window { x0: 2, y0: 2, x1: 4, y1: 4 }));
        assert_eq!(shown.transfers.len(), 3);
        assert_eq!(shown.bytes(), frame);
        assert!(shown.ended);
        assert_eq!(scanout.display().overruns, 0);
        assert!(!scanout.is_busy());
    }

    #[test]
    fn integer_scale_reuses_lines_across_transfers() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<24, 2>::new();
        let mut scanout: Scanout<'_, _, 4, 24, 2> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(4, 4, Fit::Integer(2), 3),
            FrameGeometry::new(2, 2, 2),
        )
        .unwrap();
        assert_eq!(scanout.lines_per_transfer(), 3);

        scanout.show(&numbered(2, 2)).unwrap();
        let shown = &scanout.display().frames[0];
        let sizes: Vec<_> = shown.transfers.iter().map(Vec::len).collect();
        assert_eq!(sizes, [24, 8]);
        let row = |y: u8| [y, 0, y, 0, y, 1, y, 1];
        let expected: Vec<u8> = [row(0), row(0), row(1), row(1)].concat();
        assert_eq!(shown.bytes(), expected);
    }

    #[test]
    fn padding_uses_the_background() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<6, 3>::new();
        let mut scanout: Scanout<'_, _, 3, 6, 3> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(3, 3, Fit::Integer(1), 4),
            FrameGeometry::new(1, 1, 2),
        )
        .unwrap();
        // Only one 3-pixel line fits in 6 bytes.
        assert_eq!(scanout.lines_per_transfer(), 1);

        scanout.show(&[0x12, 0x34]).unwrap();
        let bg = [0xBB; 6];
        let middle = [0xBB, 0xBB, 0x12, 0x34, 0xBB, 0xBB];
        assert_eq!(scanout.display().frames[0].bytes(), [bg, middle, bg].concat());
    }

    #[test]
    fn converts_pixels_while_scaling() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<16, 2>::new();
        let config = ScanoutConfig {
            packing: Packing::Rgb888ToRgb565,
            background: Background::from_rgb565(Rgb565::BLACK),
            ..config(2, 2, Fit::Stretch, 2)
        };
        let mut scanout: Scanout<'_, _, 2, 16, 2> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config,
            FrameGeometry::new(1, 1, 3),
        )
        .unwrap();

        scanout.show(&[0, 255, 0]).unwrap();
        assert_eq!(scanout.display().frames[0].bytes(), [0x07, 0xE0].repeat(4));
    }

    #[test]
    fn rejects_contract_violations_without_touching_the_panel() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<64, 2>::new();
        let mut scanout: Scanout<'_, _, 8, 64, 2> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(4, 4, Fit::Native, 1),
            FrameGeometry::new(4, 4, 2),
        )
        .unwrap();

        assert_eq!(scanout.show(&[]), Err(ScanoutError::EmptyFrame));
        assert_eq!(
            scanout.show(&[0; 10]),
            Err(ScanoutError::FrameSize { expected: 32, got: 10 })
        );
        assert!(scanout.display().frames.is_empty());
        assert_eq!(scanout.frames_shown(), 0);
    }

    #[test]
    fn shows_only_ready_slots() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<64, 2>::new();
        let geometry = FrameGeometry::new(2, 2, 2);
        let mut scanout: Scanout<'_, _, 8, 64, 2> = Scanout::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(2, 2, Fit::Native, 2),
            geometry,
        )
        .unwrap();
        let mut pool = FramePool::<8, 2>::new();
        pool.configure(geometry).unwrap();
        pool.start(2);

        assert_eq!(
            scanout.show_slot(&pool, 0),
            Err(ScanoutError::NotReady { slot: 0 })
        );
        pool.commit(0, 8);
        scanout.show_slot(&pool, 0).unwrap();
        assert_eq!(scanout.display().shown(), 1);
    }

    #[test]
    fn rejects_inconsistent_configuration() {
        let (done, on_done) = completion!();
        let mut staging = Staging::<8, 2>::new();
        let geometry = FrameGeometry::new(4, 4, 2);

        let err = Scanout::<'_, _, 8, 8, 2>::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            ScanoutConfig {
                packing: Packing::Rgb888ToRgb565,
                ..config(4, 4, Fit::Native, 1)
            },
            geometry,
        )
        .err();
        assert_eq!(err, Some(ConfigError::PixelSizeMismatch { frame: 2, packing: 3 }));

        let err = Scanout::<'_, _, 8, 8, 2>::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            ScanoutConfig {
                background: Background::from_bytes(&[0]),
                ..config(4, 4, Fit::Native, 1)
            },
            geometry,
        )
        .err();
        assert_eq!(err, Some(ConfigError::BackgroundSize { background: 1, pixel: 2 }));

        let err = Scanout::<'_, _, 8, 8, 2>::new(
            RecordingDisplay::new(on_done, done),
            done,
            &mut staging,
            config(8, 8, Fit::Integer(2), 1),
            geometry,
        )
        .err();
        assert_eq!(err, Some(ConfigError::StagingTooSmall { line_bytes: 16, capacity: 8 }));
    }
}
