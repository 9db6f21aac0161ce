//! Splits a byte buffer into head/body/tail and writes each part to a
//! (possibly non-contiguous) sequence of block addresses.

use crate::address::{Address, BLOCK_SIZE};
use crate::disk_access::DiskAccess;
use crate::error::Result;

/// Returns how many block addresses a write of `len` bytes starting
/// `offset` bytes into the first block will need.
pub fn blocks_required(len: u64, offset: u64) -> u64 {
    if len == 0 {
        return 0;
    }
    let head = (BLOCK_SIZE - offset).min(len);
    if head == len {
        return 1;
    }
    let remaining = len - head;
    let body_blocks = remaining / BLOCK_SIZE;
    let tail = remaining % BLOCK_SIZE;
    1 + body_blocks + if tail > 0 { 1 } else { 0 }
}

/// Writes `buffer` across `blocks`, starting `offset` bytes into the first
/// block. `blocks` must cover exactly the write range (its length must
/// equal `blocks_required(buffer.len(), offset)`).
pub fn write_sparse(disk: &DiskAccess, blocks: &[Address], offset: u64, buffer: &[u8]) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    debug_assert_eq!(blocks.len() as u64, blocks_required(buffer.len() as u64, offset));

    let head_len = (BLOCK_SIZE - offset).min(buffer.len() as u64) as usize;
    let mut written = 0usize;

    let mut off = blocks[0].as_u64() + offset;
    disk.write_bytes(&mut off, &buffer[..head_len])?;
    written += head_len;

    let mut block_cursor = 1usize;
    while buffer.len() - written >= BLOCK_SIZE as usize {
        let mut off = blocks[block_cursor].as_u64();
        disk.write_bytes(&mut off, &buffer[written..written + BLOCK_SIZE as usize])?;
        written += BLOCK_SIZE as usize;
        block_cursor += 1;
    }

    if written < buffer.len() {
        let mut off = blocks[block_cursor].as_u64();
        disk.write_bytes(&mut off, &buffer[written..])?;
    }

    Ok(())
}
