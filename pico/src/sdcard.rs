//! Raw byte-addressed reads from an SD card. The frames are written straight
//! to the card, outside any filesystem.

use embedded_sdmmc::{Block, BlockDevice, BlockIdx};
use frame_stream::BlockStorage;

/// Blocks fetched per device command.
const BOUNCE_BLOCKS: usize = 8;

pub struct SdStorage<D: BlockDevice> {
    device: D,
    position: u64,
    bounce: [Block; BOUNCE_BLOCKS],
}

impl<D: BlockDevice> SdStorage<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            position: 0,
            bounce: core::array::from_fn(|_| Block::new()),
        }
    }

    /// Card size in bytes. The first call also brings the card up.
    pub fn capacity(&self) -> Result<u64, D::Error> {
        let blocks = self.device.num_blocks()?;
        Ok(blocks.0 as u64 * Block::LEN as u64)
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: BlockDevice> BlockStorage for SdStorage<D> {
    type Error = D::Error;

    fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        self.position = offset;
        Ok(())
    }

    fn skip(&mut self, bytes: u64) -> Result<(), Self::Error> {
        self.position += bytes;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let mut done = 0;
        while done < dst.len() {
            let first = BlockIdx((self.position / Block::LEN as u64) as u32);
            let mut skip = (self.position % Block::LEN as u64) as usize;
            let count = (skip + dst.len() - done)
                .div_ceil(Block::LEN)
                .min(BOUNCE_BLOCKS);
            let blocks = &mut self.bounce[..count];
            self.device.read(blocks, first)?;

            for block in blocks.iter() {
                let src = &block.contents[skip..];
                let take = src.len().min(dst.len() - done);
                dst[done..done + take].copy_from_slice(&src[..take]);
                done += take;
                self.position += take as u64;
                skip = 0;
            }
        }
        Ok(done)
    }
}
