//! SimpleFS: a block-oriented filesystem for education, built on a pluggable
//! [`BlockDevice`] rather than a raw partition.
//!
//! The inode table uses 5 direct pointers and one single-indirect pointer
//! per inode ([`MAX_FILE_SIZE`] bytes, at most). There is no
//! on-disk free list: [`Filesystem::mount`] rebuilds the free-block bitmap
//! by scanning every inode, the same way the teacher's `mkfs` derives a
//! block group's bitmap from the layout it is about to write rather than
//! keeping a separate free list around.
//!
//! ```
//! use simplefs::{BlockDevice, Filesystem, MemBlockDevice};
//!
//! let mut fs = Filesystem::new(MemBlockDevice::new(20));
//! assert!(fs.format());
//! assert!(fs.mount());
//!
//! let inumber = fs.create();
//! fs.write(inumber, b"hello, disk", 11, 0);
//!
//! let mut buf = [0u8; 11];
//! fs.read(inumber, &mut buf, 11, 0);
//! assert_eq!(&buf, b"hello, disk");
//! ```

mod bitmap;
mod block;
mod device;
mod fs;

pub use block::{BLOCK_SIZE, INODES_PER_BLOCK, MAX_FILE_SIZE, POINTERS_PER_BLOCK, POINTERS_PER_INODE};
pub use device::{BlockDevice, FileBlockDevice, MemBlockDevice};
pub use fs::Filesystem;
