//! Conversion of stored pixels into the bytes the panel expects.

use embedded_graphics::pixelcolor::{IntoStorage, Rgb565, Rgb888};

/// Source-to-wire pixel conversion applied while filling staging lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Packing {
    /// Stored bytes are already in wire order.
    Copy { bytes_per_pixel: u8 },
    /// 16-bit pixels with the two bytes exchanged.
    Swap16,
    /// 24-bit RGB reduced to big-endian RGB565.
    Rgb888ToRgb565,
}

impl Packing {
    pub const fn source_bytes(&self) -> usize {
        match self {
            Packing::Copy { bytes_per_pixel } => *bytes_per_pixel as usize,
            Packing::Swap16 => 2,
            Packing::Rgb888ToRgb565 => 3,
        }
    }

    pub const fn output_bytes(&self) -> usize {
        match self {
            Packing::Copy { bytes_per_pixel } => *bytes_per_pixel as usize,
            Packing::Swap16 | Packing::Rgb888ToRgb565 => 2,
        }
    }

    /// Convert one pixel.
    #[inline]
    pub fn pack(&self, src: &[u8], dst: &mut [u8]) {
        match self {
            Packing::Copy { .. } => dst.copy_from_slice(src),
            Packing::Swap16 => {
                dst[0] = src[1];
                dst[1] = src[0];
            }
            Packing::Rgb888ToRgb565 => {
                let colour = Rgb565::from(Rgb888::new(src[0], src[1], src[2]));
                dst.copy_from_slice(&colour.into_storage().to_be_bytes());
            }
        }
    }

    /// Convert a run of whole pixels.
    pub fn pack_run(&self, src: &[u8], dst: &mut [u8]) {
        if let Packing::Copy { .. } = self {
            dst.copy_from_slice(src);
            return;
        }
        for (s, d) in src
            .chunks_exact(self.source_bytes())
            .zip(dst.chunks_exact_mut(self.output_bytes()))
        {
            self.pack(s, d);
        }
    }
}

impl Default for Packing {
    fn default() -> Self {
        Packing::Copy { bytes_per_pixel: 2 }
    }
}

/// One output pixel's worth of wire bytes used for padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Background {
    bytes: [u8; 4],
    len: u8,
}

impl Background {
    pub const BLACK_565: Self = Self {
        bytes: [0; 4],
        len: 2,
    };

    /// Raw wire bytes, at most four.
    pub const fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = [0; 4];
        let len = if bytes.len() < 4 { bytes.len() } else { 4 };
        let mut i = 0;
        while i < len {
            out[i] = bytes[i];
            i += 1;
        }
        Self {
            bytes: out,
            len: len as u8,
        }
    }

    pub fn from_rgb565(colour: Rgb565) -> Self {
        let [hi, lo] = colour.into_storage().to_be_bytes();
        Self {
            bytes: [hi, lo, 0, 0],
            len: 2,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn fill(&self, dst: &mut [u8]) {
        match self.as_bytes() {
            [] => {}
            [b] => dst.fill(*b),
            pixel => {
                for d in dst.chunks_exact_mut(pixel.len()) {
                    d.copy_from_slice(pixel);
                }
            }
        }
    }
}

impl Default for Background {
    fn default() -> Self {
        Self::BLACK_565
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::RgbColor;

    #[test]
    fn pixel_sizes() {
        assert_eq!(Packing::Copy { bytes_per_pixel: 3 }.source_bytes(), 3);
        assert_eq!(Packing::Copy { bytes_per_pixel: 3 }.output_bytes(), 3);
        assert_eq!(Packing::Swap16.source_bytes(), 2);
        assert_eq!(Packing::Rgb888ToRgb565.source_bytes(), 3);
        assert_eq!(Packing::Rgb888ToRgb565.output_bytes(), 2);
    }

    #[test]
    fn swaps_sixteen_bit_pixels() {
        let mut out = [0; 4];
        Packing::Swap16.pack_run(&[0x12, 0x34, 0xAB, 0xCD], &mut out);
        assert_eq!(out, [0x34, 0x12, 0xCD, 0xAB]);
    }

    #[test]
    fn reduces_rgb888_to_big_endian_565() {
        let mut out = [0; 6];
        Packing::Rgb888ToRgb565.pack_run(&[255, 0, 0, 0, 255, 0, 0, 0, 255], &mut out);
        assert_eq!(out, [0xF8, 0x00, 0x07, 0xE0, 0x00, 0x1F]);
    }

    #[test]
    fn background_fills_whole_pixels() {
        let mut line = [0; 6];
        Background::from_rgb565(Rgb565::BLUE).fill(&mut line);
        assert_eq!(line, [0x00, 0x1F, 0x00, 0x1F, 0x00, 0x1F]);

        let mut line = [0; 3];
        Background::from_bytes(&[9]).fill(&mut line);
        assert_eq!(line, [9, 9, 9]);
        assert_eq!(Background::from_bytes(&[1, 2, 3, 4, 5]).as_bytes(), [1, 2, 3, 4]);
        assert_eq!(Background::default().as_bytes(), [0, 0]);
    }
}
