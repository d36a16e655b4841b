//! The block device abstraction SimpleFS is built on top of, plus two
//! concrete implementations.
//!
//! `spec.md` treats the block device as an external collaborator with
//! `size()`/`read()`/`write()` primitives; this module is that collaborator's
//! Rust shape, plus the two backings the rest of the crate actually needs: a
//! real file (`FileBlockDevice`) and an in-memory scratchpad
//! (`MemBlockDevice`).

use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::block::{zeroed_block, RawBlock, BLOCK_SIZE};

/// A fixed-size array of `BLOCK_SIZE`-byte sectors, addressed by block
/// number.
///
/// Implementations are not required to cache anything: the inode manager
/// never assumes a block read here reflects anything but the last write to
/// that same block number.
pub trait BlockDevice {
	/// Number of `BLOCK_SIZE`-byte blocks backing this device.
	fn block_count(&self) -> u32;

	/// Reads block `block_no` into `buf`. `block_no` must be `< block_count()`.
	fn read_block(&mut self, block_no: u32, buf: &mut RawBlock) -> io::Result<()>;

	/// Writes `buf` to block `block_no`. `block_no` must be `< block_count()`.
	fn write_block(&mut self, block_no: u32, buf: &RawBlock) -> io::Result<()>;
}

/// A block device backed by a regular file, opened for reading and writing.
///
/// Block `n` lives at byte offset `n * BLOCK_SIZE`, mirroring how the
/// teacher's `mkfs` seeks to a computed offset before every
/// `read_exact`/`write_all` against the device file.
pub struct FileBlockDevice {
	file: File,
	block_count: u32,
}

impl FileBlockDevice {
	/// Wraps `file`, whose length must already be a multiple of
	/// `BLOCK_SIZE`; the block count is derived from the file's current
	/// length.
	pub fn new(file: File) -> io::Result<Self> {
		let len = file.metadata()?.len();
		let block_count = (len / BLOCK_SIZE as u64) as u32;
		Ok(FileBlockDevice { file, block_count })
	}

	fn seek_to(&mut self, block_no: u32) -> io::Result<()> {
		self.file
			.seek(SeekFrom::Start(block_no as u64 * BLOCK_SIZE as u64))?;
		Ok(())
	}
}

impl BlockDevice for FileBlockDevice {
	fn block_count(&self) -> u32 {
		self.block_count
	}

	fn read_block(&mut self, block_no: u32, buf: &mut RawBlock) -> io::Result<()> {
		self.seek_to(block_no)?;
		self.file.read_exact(buf)
	}

	fn write_block(&mut self, block_no: u32, buf: &RawBlock) -> io::Result<()> {
		self.seek_to(block_no)?;
		self.file.write_all(buf)
	}
}

/// A block device backed by a `Vec<u8>`, sized at construction time.
///
/// Used by this crate's own tests, and available to any caller that wants a
/// SimpleFS image without a host filesystem underneath it.
pub struct MemBlockDevice {
	blocks: Vec<RawBlock>,
}

impl MemBlockDevice {
	/// Creates a zeroed device of `block_count` blocks.
	pub fn new(block_count: u32) -> Self {
		MemBlockDevice {
			blocks: vec![zeroed_block(); block_count as usize],
		}
	}
}

impl BlockDevice for MemBlockDevice {
	fn block_count(&self) -> u32 {
		self.blocks.len() as u32
	}

	fn read_block(&mut self, block_no: u32, buf: &mut RawBlock) -> io::Result<()> {
		let block = self.blocks.get(block_no as usize).ok_or_else(out_of_range)?;
		buf.copy_from_slice(block);
		Ok(())
	}

	fn write_block(&mut self, block_no: u32, buf: &RawBlock) -> io::Result<()> {
		let block = self
			.blocks
			.get_mut(block_no as usize)
			.ok_or_else(out_of_range)?;
		block.copy_from_slice(buf);
		Ok(())
	}
}

fn out_of_range() -> io::Error {
	io::Error::new(io::ErrorKind::InvalidInput, "block number out of range")
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn mem_device_roundtrip() {
		let mut dev = MemBlockDevice::new(4);
		assert_eq!(dev.block_count(), 4);

		let mut buf = zeroed_block();
		buf[0] = 0xAB;
		dev.write_block(2, &buf).unwrap();

		let mut out = zeroed_block();
		dev.read_block(2, &mut out).unwrap();
		assert_eq!(out[0], 0xAB);

		// Other blocks stay zeroed.
		let mut zero = zeroed_block();
		dev.read_block(1, &mut zero).unwrap();
		assert_eq!(zero, zeroed_block());
	}

	#[test]
	fn mem_device_rejects_out_of_range() {
		let mut dev = MemBlockDevice::new(2);
		let buf = zeroed_block();
		assert!(dev.read_block(5, &mut buf.clone()).is_err());
		assert!(dev.write_block(5, &buf).is_err());
	}
}
