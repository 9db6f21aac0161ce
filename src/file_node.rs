//! A regular file's data: growth, truncation, and positional read/write
//! through the sparse writer.

use crate::address::BLOCK_SIZE;
use crate::block_address_storage::BlockAllocator;
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};
use crate::node::NodeCore;
use crate::sparse_writer;

pub struct FileNode {
    pub core: NodeCore,
}

impl FileNode {
    pub fn create(disk: &DiskAccess, header_address: crate::address::Address) -> Result<Self> {
        let core = NodeCore::new(header_address, false);
        core.save(disk)?;
        Ok(Self { core })
    }

    pub fn load(disk: &DiskAccess, header_address: crate::address::Address) -> Result<Self> {
        let core = NodeCore::load(disk, header_address)?;
        if core.is_directory {
            return Err(Error::WrongKind("node is not a file".into()));
        }
        Ok(Self { core })
    }

    pub fn size(&self) -> u64 {
        self.core.size
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (short at end of file; never errors on
    /// reading past the end).
    pub fn read_data(
        &self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        if offset >= self.core.size {
            return Ok(0);
        }
        let to_read = buf.len().min((self.core.size - offset) as usize);
        let mut read = 0usize;
        let mut pos = offset;
        while read < to_read {
            let block_index = pos / BLOCK_SIZE;
            let in_block = pos % BLOCK_SIZE;
            let chunk = ((BLOCK_SIZE - in_block) as usize).min(to_read - read);
            let block_addr = self
                .core
                .blocks
                .get_block_start_address(disk, allocator, block_index)?;
            let mut off = block_addr.as_u64() + in_block;
            let data = disk.read_bytes(&mut off, chunk)?;
            buf[read..read + data.len()].copy_from_slice(&data);
            if data.len() < chunk {
                return Ok(read + data.len());
            }
            read += chunk;
            pos += chunk as u64;
        }
        Ok(read)
    }

    /// Writes `buffer` starting at `offset`, growing the file (allocating
    /// blocks and zero-extending any gap) as needed.
    pub fn write_data(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        offset: u64,
        buffer: &[u8],
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let end = offset + buffer.len() as u64;
        self.ensure_size(disk, allocator, end)?;

        let first_block = offset / BLOCK_SIZE;
        let last_block = (end - 1) / BLOCK_SIZE;
        let mut blocks = Vec::with_capacity((last_block - first_block + 1) as usize);
        for idx in first_block..=last_block {
            blocks.push(
                self.core
                    .blocks
                    .get_block_start_address(disk, allocator, idx)?,
            );
        }
        let in_block_offset = offset % BLOCK_SIZE;
        sparse_writer::write_sparse(disk, &blocks, in_block_offset, buffer)?;

        self.core.touch_modified();
        self.core.save(disk)
    }

    /// Grows or shrinks the file to exactly `new_size` bytes, allocating or
    /// freeing whole blocks as needed. Growth zero-fills the new gap, since
    /// the allocator hands out blocks that may carry another file's
    /// previously-freed bytes.
    pub fn set_file_size(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        new_size: u64,
    ) -> Result<()> {
        let old_size = self.core.size;
        let current_blocks = self.core.blocks.num_blocks_allocated;
        let needed_blocks = new_size.div_ceil(BLOCK_SIZE).max(if new_size == 0 { 0 } else { 1 });
        if needed_blocks > current_blocks {
            self.core.blocks.add_blocks(
                disk,
                allocator,
                self.core.header_address,
                needed_blocks - current_blocks,
            )?;
        } else if needed_blocks < current_blocks {
            self.core.blocks.free_last_blocks(
                disk,
                allocator,
                self.core.header_address,
                current_blocks - needed_blocks,
            )?;
        }
        self.core.size = new_size;
        if new_size > old_size {
            self.zero_range(disk, allocator, old_size, new_size)?;
        }
        self.core.touch_modified();
        self.core.save(disk)
    }

    fn ensure_size(&mut self, disk: &DiskAccess, allocator: &dyn BlockAllocator, at_least: u64) -> Result<()> {
        if at_least <= self.core.size {
            return Ok(());
        }
        let old_size = self.core.size;
        let current_blocks = self.core.blocks.num_blocks_allocated;
        let needed_blocks = at_least.div_ceil(BLOCK_SIZE);
        if needed_blocks > current_blocks {
            self.core.blocks.add_blocks(
                disk,
                allocator,
                self.core.header_address,
                needed_blocks - current_blocks,
            )?;
        }
        self.core.size = at_least;
        self.zero_range(disk, allocator, old_size, at_least)
    }

    /// Zeroes the byte range `[start, end)`, which must already lie within
    /// allocated blocks. Used to keep a grown file's new gap from exposing
    /// another file's previously-freed block contents.
    fn zero_range(
        &self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let zeros = [0u8; BLOCK_SIZE as usize];
        let mut pos = start;
        while pos < end {
            let block_index = pos / BLOCK_SIZE;
            let in_block = pos % BLOCK_SIZE;
            let chunk = ((BLOCK_SIZE - in_block) as usize).min((end - pos) as usize);
            let block_addr = self
                .core
                .blocks
                .get_block_start_address(disk, allocator, block_index)?;
            let mut off = block_addr.as_u64() + in_block;
            disk.write_bytes(&mut off, &zeros[..chunk])?;
            pos += chunk as u64;
        }
        Ok(())
    }
}
