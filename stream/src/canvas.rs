use embedded_graphics::{
    Pixel,
    pixelcolor::{IntoStorage, Rgb565},
    prelude::{DrawTarget, OriginDimensions, Size},
};

use crate::pool::FrameGeometry;

/// Draw target over one frame's worth of big-endian RGB565 bytes, the layout
/// frames are stored in on the card.
pub struct Canvas<'a> {
    data: &'a mut [u8],
    width: usize,
    height: usize,
}

impl<'a> Canvas<'a> {
    /// `None` unless `geometry` is 2 bytes per pixel and `data` holds a whole
    /// frame.
    pub fn new(data: &'a mut [u8], geometry: FrameGeometry) -> Option<Self> {
        if geometry.bytes_per_pixel != 2 || data.len() < geometry.frame_size() {
            return None;
        }
        Some(Canvas {
            data,
            width: geometry.width as usize,
            height: geometry.height as usize,
        })
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, color: Rgb565) {
        let idx = (y * self.width + x) * 2;
        self.data[idx..idx + 2].copy_from_slice(&color.into_storage().to_be_bytes());
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb565;

    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels.into_iter() {
            if coord.x >= 0
                && coord.y >= 0
                && (coord.x as usize) < self.width
                && (coord.y as usize) < self.height
            {
                self.set_pixel(coord.x as usize, coord.y as usize, color);
            }
        }

        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let [hi, lo] = color.into_storage().to_be_bytes();
        for px in self.data[..self.width * self.height * 2].chunks_exact_mut(2) {
            px[0] = hi;
            px[1] = lo;
        }
        Ok(())
    }
}
