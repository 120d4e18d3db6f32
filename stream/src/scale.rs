//! Destination-to-source index maps for scan-out.
//!
//! Each map answers "which source column (or row) feeds destination pixel
//! `d`", with [`ScaleMap::OUTSIDE`] marking padding that gets the background
//! colour. Maps are built once per layout, so the per-line work is a table
//! lookup.

use crate::ConfigError;
use crate::pool::FrameGeometry;

/// How a frame is placed on the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fit {
    /// 1:1 in a window centered on the panel. Frames larger than the panel
    /// are cropped around their center.
    Native,
    /// Every source pixel becomes a k×k block; the result is centered on the
    /// full panel, padded or cropped as needed.
    Integer(u8),
    /// Nearest-neighbour resample to the whole panel.
    Stretch,
    /// 1:1 copies repeated across the panel with one copy centered.
    Tile,
}

/// Inclusive output rectangle in panel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

impl Window {
    pub const fn new(x0: u16, y0: u16, width: u16, height: u16) -> Self {
        Self {
            x0,
            y0,
            x1: x0 + width - 1,
            y1: y0 + height - 1,
        }
    }

    pub const fn width(&self) -> usize {
        (self.x1 - self.x0) as usize + 1
    }

    pub const fn height(&self) -> usize {
        (self.y1 - self.y0) as usize + 1
    }

    pub const fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }
}

/// Lookup table of up to `N` destination indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScaleMap<const N: usize> {
    len: usize,
    table: [u16; N],
    /// First source index when the whole map is one contiguous run.
    run: Option<u16>,
}

impl<const N: usize> ScaleMap<N> {
    pub const OUTSIDE: u16 = u16::MAX;

    /// `src` pixels scaled by `k` and centered in `dst`.
    fn centered(dst: usize, src: usize, k: usize) -> Self {
        let offset = (dst as i32 - (src * k) as i32) / 2;
        Self::build(dst, |d| {
            let rel = d as i32 - offset;
            if rel < 0 {
                return None;
            }
            let s = rel as usize / k;
            (s < src).then_some(s)
        })
    }

    /// `floor(d * src / dst)`.
    fn nearest(dst: usize, src: usize) -> Self {
        Self::build(dst, |d| Some(d * src / dst))
    }

    /// `src` repeated across `dst`, one copy centered.
    fn tiled(dst: usize, src: usize) -> Self {
        let offset = (dst as i32 - src as i32) / 2;
        Self::build(dst, |d| Some((d as i32 - offset).rem_euclid(src as i32) as usize))
    }

    fn build(len: usize, source: impl Fn(usize) -> Option<usize>) -> Self {
        let mut table = [Self::OUTSIDE; N];
        for (d, entry) in table[..len].iter_mut().enumerate() {
            *entry = source(d).map_or(Self::OUTSIDE, |s| s as u16);
        }
        let first = table.first().copied().filter(|&s| s != Self::OUTSIDE && len > 0);
        let run = first.filter(|&s0| {
            table[..len]
                .iter()
                .enumerate()
                .all(|(d, &s)| s != Self::OUTSIDE && s as usize == s0 as usize + d)
        });
        Self { len, table, run }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn source_of(&self, d: usize) -> Option<usize> {
        match self.table[..self.len].get(d) {
            Some(&s) if s != Self::OUTSIDE => Some(s as usize),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[u16] {
        &self.table[..self.len]
    }

    /// Source index of destination 0 when destination `d` always reads source
    /// `start + d`.
    pub fn contiguous_start(&self) -> Option<usize> {
        self.run.map(usize::from)
    }

    /// Destination `d` reads exactly what `d - 1` read.
    pub fn repeats_previous(&self, d: usize) -> bool {
        d > 0 && d < self.len && self.table[d] == self.table[d - 1]
    }
}

/// Output window plus the column and row maps that fill it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout<const N: usize> {
    pub window: Window,
    pub columns: ScaleMap<N>,
    pub rows: ScaleMap<N>,
}

impl<const N: usize> Layout<N> {
    pub fn plan(
        panel_width: u16,
        panel_height: u16,
        frame: FrameGeometry,
        fit: Fit,
    ) -> Result<Self, ConfigError> {
        if frame.is_empty() || panel_width == 0 || panel_height == 0 {
            return Err(ConfigError::EmptyGeometry);
        }
        let extent = panel_width.max(panel_height) as usize;
        if extent > N {
            return Err(ConfigError::PanelTooLarge {
                extent,
                capacity: N,
            });
        }

        let (pw, ph) = (panel_width as usize, panel_height as usize);
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let full = Window::new(0, 0, panel_width, panel_height);
        let layout = match fit {
            Fit::Native => {
                let (w, h) = (fw.min(pw), fh.min(ph));
                Self {
                    window: Window::new(((pw - w) / 2) as u16, ((ph - h) / 2) as u16, w as u16, h as u16),
                    columns: ScaleMap::centered(w, fw, 1),
                    rows: ScaleMap::centered(h, fh, 1),
                }
            }
            Fit::Integer(0) => return Err(ConfigError::ZeroScale),
            Fit::Integer(k) => Self {
                window: full,
                columns: ScaleMap::centered(pw, fw, k as usize),
                rows: ScaleMap::centered(ph, fh, k as usize),
            },
            Fit::Stretch => Self {
                window: full,
                columns: ScaleMap::nearest(pw, fw),
                rows: ScaleMap::nearest(ph, fh),
            },
            Fit::Tile => Self {
                window: full,
                columns: ScaleMap::tiled(pw, fw),
                rows: ScaleMap::tiled(ph, fh),
            },
        };
        debug!(
            "scale: {:?} {}x{} -> window ({}, {})..({}, {})",
            fit,
            frame.width,
            frame.height,
            layout.window.x0,
            layout.window.y0,
            layout.window.x1,
            layout.window.y1
        );
        Ok(layout)
    }

    pub fn width(&self) -> usize {
        self.window.width()
    }

    pub fn height(&self) -> usize {
        self.window.height()
    }
}
