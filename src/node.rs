//! The header common to every node (file or directory), and the timed
//! reader/writer lock that serialises access to it.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::address::{Address, NODE_LOCK_TIMEOUT_MS};
use crate::block_address_storage::BlockAddressStorage;
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};

/// The 1 s bounded acquisition every node lock enforces. Locks are not
/// reentrant; a timeout is a retryable failure, not a deadlock.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(NODE_LOCK_TIMEOUT_MS);

/// An owned read guard: holds its own clone of the lock's `Arc`, so it can
/// outlive the scope that looked the node up in the cache.
pub type ReadGuard<T> = ArcRwLockReadGuard<RawRwLock, T>;
/// An owned write guard; see [`ReadGuard`].
pub type WriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, T>;

/// Acquires `lock` for reading, failing with [`Error::LockTimeout`] rather
/// than blocking indefinitely.
pub fn read_timed<T>(lock: &Arc<RwLock<T>>) -> Result<ReadGuard<T>> {
    RwLock::try_read_arc_for(lock, LOCK_TIMEOUT).ok_or(Error::LockTimeout)
}

/// Acquires `lock` for writing, failing with [`Error::LockTimeout`] rather
/// than blocking indefinitely.
pub fn write_timed<T>(lock: &Arc<RwLock<T>>) -> Result<WriteGuard<T>> {
    RwLock::try_write_arc_for(lock, LOCK_TIMEOUT).ok_or(Error::LockTimeout)
}

/// A non-blocking read attempt, used while walking a path: a write-lock
/// holder on a child aborts the whole walk rather than stalling it.
pub fn try_read_now<T>(lock: &Arc<RwLock<T>>) -> Option<ReadGuard<T>> {
    RwLock::try_read_arc(lock)
}

/// Returns the current tick count: 100 ns units since the Unix epoch,
/// matching the on-disk `created_ticks`/`modified_ticks` fields.
pub fn now_ticks() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_nanos() / 100) as i64
}

/// Common node header: kind flag, size, timestamps, and the block-address
/// storage shared by files and directories.
#[derive(Debug, Clone)]
pub struct NodeCore {
    pub header_address: Address,
    pub is_directory: bool,
    /// Bytes for files; entry count for directories.
    pub size: u64,
    pub created_ticks: i64,
    pub modified_ticks: i64,
    pub blocks: BlockAddressStorage,
}

impl NodeCore {
    /// Builds a freshly-allocated, empty node header in memory. Callers
    /// must `save` it before it is visible to other mounts.
    pub fn new(header_address: Address, is_directory: bool) -> Self {
        let now = now_ticks();
        Self {
            header_address,
            is_directory,
            size: 0,
            created_ticks: now,
            modified_ticks: now,
            blocks: BlockAddressStorage::new(),
        }
    }

    pub fn load(disk: &DiskAccess, header_address: Address) -> Result<Self> {
        let mut off = header_address.as_u64();
        let is_directory = disk.read_byte(&mut off)? != 0;
        let size = disk.read_u64(&mut off)?;
        let created_ticks = disk.read_u64(&mut off)? as i64;
        let modified_ticks = disk.read_u64(&mut off)? as i64;
        let blocks = BlockAddressStorage::load(disk, header_address)?;
        Ok(Self {
            header_address,
            is_directory,
            size,
            created_ticks,
            modified_ticks,
            blocks,
        })
    }

    pub fn save(&self, disk: &DiskAccess) -> Result<()> {
        let mut off = self.header_address.as_u64();
        disk.write_byte(&mut off, self.is_directory as u8)?;
        disk.write_u64(&mut off, self.size)?;
        disk.write_u64(&mut off, self.created_ticks as u64)?;
        disk.write_u64(&mut off, self.modified_ticks as u64)?;
        self.blocks.save(disk, self.header_address)
    }

    pub fn touch_modified(&mut self) {
        self.modified_ticks = now_ticks();
    }
}
