//! The volume as a whole: format/mount, block and node allocation across
//! groups, and the live-node cache that hands out the one `Arc<RwLock<_>>`
//! per node every caller shares.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::address::{Address, BLOCKS_PER_GROUP, BLOCK_SIZE, RESERVED_BLOCKS};
use crate::block_address_storage::BlockAllocator;
use crate::block_group::{BlockGroup, BlockGroupDescriptor, DESCRIPTOR_SIZE};
use crate::directory_node::DirectoryNode;
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};
use crate::file_node::FileNode;

/// `volume_size` (8B) + `free_space_blocks` (8B) + `root_node_address` (8B)
/// + `group_count` (8B), in that order, as laid out in the format's master
/// record. The group descriptor table follows immediately after.
const FIXED_HEADER_SIZE: u64 = 8 + 8 + 8 + 8;

/// A node resident in the live-node cache: either a directory or a file,
/// behind the single reader/writer lock every handle to it shares.
pub enum NodeObject {
    Directory(DirectoryNode),
    File(FileNode),
}

impl NodeObject {
    pub fn as_directory(&self) -> Result<&DirectoryNode> {
        match self {
            NodeObject::Directory(d) => Ok(d),
            NodeObject::File(_) => Err(Error::WrongKind("expected a directory".into())),
        }
    }

    pub fn as_directory_mut(&mut self) -> Result<&mut DirectoryNode> {
        match self {
            NodeObject::Directory(d) => Ok(d),
            NodeObject::File(_) => Err(Error::WrongKind("expected a directory".into())),
        }
    }

    pub fn as_file(&self) -> Result<&FileNode> {
        match self {
            NodeObject::File(f) => Ok(f),
            NodeObject::Directory(_) => Err(Error::WrongKind("expected a file".into())),
        }
    }

    pub fn as_file_mut(&mut self) -> Result<&mut FileNode> {
        match self {
            NodeObject::File(f) => Ok(f),
            NodeObject::Directory(_) => Err(Error::WrongKind("expected a file".into())),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, NodeObject::Directory(_))
    }

    /// The node's own absolute header address, regardless of kind.
    pub fn header_address(&self) -> Address {
        match self {
            NodeObject::Directory(d) => d.core.header_address,
            NodeObject::File(f) => f.core.header_address,
        }
    }
}

pub struct MasterRecord {
    disk: DiskAccess,
    groups: Vec<BlockGroup>,
    total_blocks: u64,
    root_address: Address,
    /// Volume-wide free block count, decremented optimistically by
    /// `allocate_blocks` and reconciled on shortfall (`SPEC_FULL.md` §C.3).
    /// This is the value persisted as `free_space_blocks` in the header.
    free_space_blocks: Mutex<u64>,
    cache: DashMap<Address, Arc<RwLock<NodeObject>>>,
}

impl MasterRecord {
    fn descriptor_offset(idx: usize) -> u64 {
        FIXED_HEADER_SIZE + idx as u64 * DESCRIPTOR_SIZE
    }

    /// Header blocks needed to hold the fixed header plus `group_count`
    /// descriptors. Pure function of `group_count`, used both while
    /// converging `format`'s layout and while reconstructing it on `mount`.
    fn header_blocks_for(group_count: u64) -> u64 {
        let needed_header_bytes = FIXED_HEADER_SIZE + group_count * DESCRIPTOR_SIZE;
        needed_header_bytes.div_ceil(BLOCK_SIZE).max(1)
    }

    /// Initialises a fresh volume over `disk`, which must already be sized
    /// to `total_bytes`, and creates its (empty) root directory.
    pub fn format(disk: DiskAccess, total_bytes: u64) -> Result<Self> {
        let total_blocks = total_bytes / BLOCK_SIZE;

        let mut header_blocks = 1u64;
        let mut group_count;
        loop {
            let remaining = total_blocks.saturating_sub(header_blocks);
            group_count = remaining.div_ceil(BLOCKS_PER_GROUP).max(1);
            let needed_header_blocks = Self::header_blocks_for(group_count);
            if needed_header_blocks == header_blocks {
                break;
            }
            header_blocks = needed_header_blocks;
        }

        let remaining = total_blocks.saturating_sub(header_blocks);
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut addr = Address(header_blocks * BLOCK_SIZE);
        let mut left = remaining;
        for _ in 0..group_count {
            let size = left.min(BLOCKS_PER_GROUP);
            if size <= RESERVED_BLOCKS {
                return Err(Error::InvalidPath(
                    "volume too small to hold a single block group".into(),
                ));
            }
            groups.push(BlockGroup::new(addr, size));
            addr = addr.add_blocks(BLOCKS_PER_GROUP);
            left -= size;
        }

        let initial_free_blocks = groups.iter().map(|g| g.free_blocks_count() as u64).sum();

        let mut record = Self {
            disk,
            groups,
            total_blocks,
            root_address: Address(0),
            free_space_blocks: Mutex::new(initial_free_blocks),
            cache: DashMap::new(),
        };

        // Allocate the root node and its data block before the first bitmap
        // flush below, so the very first on-disk snapshot already accounts
        // for them; saving the bitmaps first would let a remount see the
        // root's own slot and block as free and hand them out again.
        let root_address = record
            .allocate_one_node()
            .ok_or(Error::DiskFull)?;
        record.root_address = root_address;
        let root = DirectoryNode::create(&record.disk, &record, root_address, None)?;
        record
            .cache
            .insert(root_address, Arc::new(RwLock::new(NodeObject::Directory(root))));

        record.save()?;
        Ok(record)
    }

    /// Opens an existing volume, reading its header and group descriptors.
    pub fn mount(disk: DiskAccess) -> Result<Self> {
        let mut off = 0u64;
        let volume_size = disk.read_u64(&mut off)?;
        let free_space_blocks = disk.read_u64(&mut off)?;
        let root_address = Address(disk.read_u64(&mut off)?);
        let group_count = disk.read_u64(&mut off)?;

        let total_blocks = volume_size / BLOCK_SIZE;
        let header_blocks = Self::header_blocks_for(group_count);

        let remaining = total_blocks.saturating_sub(header_blocks);
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut addr = Address(header_blocks * BLOCK_SIZE);
        let mut left = remaining;
        for idx in 0..group_count {
            let size = left.min(BLOCKS_PER_GROUP);
            let desc = BlockGroupDescriptor::load(&disk, Self::descriptor_offset(idx as usize))?;
            if desc.bitmaps_address != addr {
                return Err(Error::Corruption("group descriptor address mismatch".into()));
            }
            groups.push(BlockGroup::load(
                &disk,
                addr,
                size,
                desc.free_blocks_in_group,
                desc.free_nodes_in_group,
            )?);
            addr = addr.add_blocks(BLOCKS_PER_GROUP);
            left -= size;
        }

        Ok(Self {
            disk,
            groups,
            total_blocks,
            root_address,
            free_space_blocks: Mutex::new(free_space_blocks),
            cache: DashMap::new(),
        })
    }

    /// Persists the bit-exact master record header: `volume_size` (8B),
    /// `free_space_blocks` (8B), `root_node_address` (8B), `group_count`
    /// (8B), in that order.
    fn save_header(&self) -> Result<()> {
        let mut off = 0u64;
        self.disk.write_u64(&mut off, self.total_blocks * BLOCK_SIZE)?;
        self.disk.write_u64(&mut off, *self.free_space_blocks.lock())?;
        self.disk.write_u64(&mut off, self.root_address.as_u64())?;
        self.disk.write_u64(&mut off, self.groups.len() as u64)?;
        Ok(())
    }

    /// Persists every group's bitmaps and descriptor, then the header. This
    /// is the only way the on-disk bitmaps are ever brought up to date with
    /// in-memory allocation state; called at the end of `format` and from
    /// `dispose`.
    fn save(&self) -> Result<()> {
        for (idx, group) in self.groups.iter().enumerate() {
            group.save(&self.disk)?;
            let desc = group.descriptor();
            desc.save(&self.disk, Self::descriptor_offset(idx))?;
        }
        self.save_header()
    }

    pub fn root_address(&self) -> Address {
        self.root_address
    }

    pub fn disk(&self) -> &DiskAccess {
        &self.disk
    }

    pub fn free_blocks_total(&self) -> u64 {
        *self.free_space_blocks.lock()
    }

    pub fn free_nodes_total(&self) -> u64 {
        self.groups.iter().map(|g| g.free_nodes_count() as u64).sum()
    }

    fn group_index_for_block(&self, addr: Address) -> Option<usize> {
        self.groups.iter().position(|g| g.contains_block(addr))
    }

    fn group_index_for_node(&self, addr: Address) -> Option<usize> {
        self.groups.iter().position(|g| g.contains_node(addr))
    }

    fn allocate_one_block(&self) -> Option<Address> {
        for (idx, group) in self.groups.iter().enumerate() {
            if let Some(addr) = group.allocate_new_block() {
                let _ = group.descriptor().save(&self.disk, Self::descriptor_offset(idx));
                return Some(addr);
            }
        }
        None
    }

    fn allocate_one_node(&self) -> Option<Address> {
        for (idx, group) in self.groups.iter().enumerate() {
            if let Some(addr) = group.allocate_new_node() {
                let _ = group.descriptor().save(&self.disk, Self::descriptor_offset(idx));
                return Some(addr);
            }
        }
        None
    }

    /// Allocates a fresh node slot and builds an empty directory node there,
    /// seeded with `.` (and `..` pointing at `parent`), registering it in
    /// the live-node cache.
    pub fn create_directory_node(&self, parent: Address) -> Result<Address> {
        let addr = self.allocate_one_node().ok_or(Error::DiskFull)?;
        let node = DirectoryNode::create(&self.disk, self, addr, Some(parent))?;
        self.cache
            .insert(addr, Arc::new(RwLock::new(NodeObject::Directory(node))));
        Ok(addr)
    }

    /// Allocates a fresh node slot and builds an empty file node there,
    /// registering it in the live-node cache.
    pub fn create_file_node(&self) -> Result<Address> {
        let addr = self.allocate_one_node().ok_or(Error::DiskFull)?;
        let node = FileNode::create(&self.disk, addr)?;
        self.cache
            .insert(addr, Arc::new(RwLock::new(NodeObject::File(node))));
        Ok(addr)
    }

    fn peek_is_directory(&self, addr: Address) -> Result<bool> {
        let mut off = addr.as_u64();
        Ok(self.disk.read_byte(&mut off)? != 0)
    }

    /// Returns the shared, lockable handle for the node at `addr`, loading
    /// it from disk on first access.
    pub fn get_node(&self, addr: Address) -> Result<Arc<RwLock<NodeObject>>> {
        match self.cache.entry(addr) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let object = if self.peek_is_directory(addr)? {
                    NodeObject::Directory(DirectoryNode::load(&self.disk, self, addr)?)
                } else {
                    NodeObject::File(FileNode::load(&self.disk, addr)?)
                };
                let arc = Arc::new(RwLock::new(object));
                e.insert(arc.clone());
                Ok(arc)
            }
        }
    }

    /// Evicts `addr` from the live-node cache, frees all of its data
    /// blocks, and releases its node slot. Callers are responsible for
    /// first detaching it from its parent directory.
    pub fn free_node_and_all_allocated_blocks(&self, addr: Address) -> Result<()> {
        let arc = self.get_node(addr)?;
        {
            let mut guard = crate::node::write_timed(&arc)?;
            let blocks = match &mut *guard {
                NodeObject::Directory(d) => &mut d.core.blocks,
                NodeObject::File(f) => &mut f.core.blocks,
            };
            let n = blocks.num_blocks_allocated;
            blocks.free_last_blocks(&self.disk, self, addr, n)?;
        }
        self.cache.remove(&addr);

        let idx = self
            .group_index_for_node(addr)
            .ok_or_else(|| Error::Corruption("node address in no group".into()))?;
        self.groups[idx].free_node(addr)?;
        let desc = self.groups[idx].descriptor();
        desc.save(&self.disk, Self::descriptor_offset(idx))?;
        Ok(())
    }

    /// Flushes every cached directory's pending compaction, persists every
    /// group's bitmaps and the header, and drops the live-node cache. Safe
    /// to call more than once.
    pub fn dispose(&self) -> Result<()> {
        for entry in self.cache.iter() {
            if let Ok(mut guard) = crate::node::write_timed(entry.value()) {
                if let NodeObject::Directory(d) = &mut *guard {
                    d.save(&self.disk, self)?;
                }
            }
        }
        self.cache.clear();
        self.save()
    }
}

impl BlockAllocator for MasterRecord {
    fn allocate_blocks(&self, n: u64) -> Result<Vec<Address>> {
        {
            let mut free = self.free_space_blocks.lock();
            if n > *free {
                return Err(Error::DiskFull);
            }
            *free -= n;
        }
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            match self.allocate_one_block() {
                Some(addr) => out.push(addr),
                None => {
                    for &addr in &out {
                        if let Some(idx) = self.group_index_for_block(addr) {
                            let _ = self.groups[idx].free_block(addr);
                            let desc = self.groups[idx].descriptor();
                            let _ = desc.save(&self.disk, Self::descriptor_offset(idx));
                        }
                    }
                    *self.free_space_blocks.lock() += n;
                    return Err(Error::DiskFull);
                }
            }
        }
        Ok(out)
    }

    fn free_blocks(&self, addrs: &[Address]) -> Result<()> {
        for &addr in addrs {
            let idx = self
                .group_index_for_block(addr)
                .ok_or_else(|| Error::Corruption("block address in no group".into()))?;
            self.groups[idx].free_block(addr)?;
            let desc = self.groups[idx].descriptor();
            desc.save(&self.disk, Self::descriptor_offset(idx))?;
        }
        *self.free_space_blocks.lock() += addrs.len() as u64;
        Ok(())
    }

    fn global_blocks_start(&self) -> Address {
        self.groups[0].bitmaps_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_access::FileStore;

    fn new_volume(mb: u64) -> MasterRecord {
        let file = tempfile::tempfile().unwrap();
        file.set_len(mb * 1024 * 1024).unwrap();
        let disk = DiskAccess::new(Box::new(FileStore::new(file)));
        MasterRecord::format(disk, mb * 1024 * 1024).unwrap()
    }

    #[test]
    fn format_creates_an_empty_root_directory() {
        let mr = new_volume(4);
        let root = mr.get_node(mr.root_address()).unwrap();
        let guard = crate::node::read_timed(&root).unwrap();
        assert!(guard.as_directory().unwrap().is_empty());
    }

    #[test]
    fn create_file_node_is_visible_through_the_cache() {
        let mr = new_volume(4);
        let addr = mr.create_file_node().unwrap();
        let handle = mr.get_node(addr).unwrap();
        assert!(!crate::node::read_timed(&handle).unwrap().is_directory());
    }

    #[test]
    fn allocate_blocks_rolls_back_on_exhaustion() {
        let mr = new_volume(1);
        let total_free: u64 = (0..mr.groups.len())
            .map(|i| mr.groups[i].free_blocks_count() as u64)
            .sum();
        let err = mr.allocate_blocks(total_free + 1).unwrap_err();
        assert!(matches!(err, Error::DiskFull));
        let after: u64 = (0..mr.groups.len())
            .map(|i| mr.groups[i].free_blocks_count() as u64)
            .sum();
        assert_eq!(after, total_free);
    }

    #[test]
    fn free_node_and_all_allocated_blocks_reclaims_space() {
        let mr = new_volume(4);
        let before: u64 = (0..mr.groups.len())
            .map(|i| mr.groups[i].free_blocks_count() as u64)
            .sum();
        let addr = mr.create_file_node().unwrap();
        {
            let handle = mr.get_node(addr).unwrap();
            let mut guard = crate::node::write_timed(&handle).unwrap();
            guard
                .as_file_mut()
                .unwrap()
                .write_data(&mr.disk, &mr, 0, b"hello")
                .unwrap();
        }
        mr.free_node_and_all_allocated_blocks(addr).unwrap();
        let after: u64 = (0..mr.groups.len())
            .map(|i| mr.groups[i].free_blocks_count() as u64)
            .sum();
        assert_eq!(before, after);
    }

    #[test]
    fn remount_recovers_the_same_root_address() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(4 * 1024 * 1024).unwrap();
        let disk = DiskAccess::new(Box::new(FileStore::new(file.try_clone().unwrap())));
        let mr = MasterRecord::format(disk, 4 * 1024 * 1024).unwrap();
        let root = mr.root_address();
        drop(mr);

        let disk2 = DiskAccess::new(Box::new(FileStore::new(file)));
        let mr2 = MasterRecord::mount(disk2).unwrap();
        assert_eq!(mr2.root_address(), root);
    }

    #[test]
    fn remount_after_dispose_does_not_reallocate_the_roots_own_address() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(4 * 1024 * 1024).unwrap();
        let disk = DiskAccess::new(Box::new(FileStore::new(file.try_clone().unwrap())));
        let mr = MasterRecord::format(disk, 4 * 1024 * 1024).unwrap();
        let root = mr.root_address();
        let file_addr = mr.create_file_node().unwrap();
        mr.dispose().unwrap();
        drop(mr);

        let disk2 = DiskAccess::new(Box::new(FileStore::new(file)));
        let mr2 = MasterRecord::mount(disk2).unwrap();
        assert_eq!(mr2.root_address(), root);

        // A remounted volume's bitmaps must already reflect every node and
        // block allocated before dispose; a fresh allocation must not hand
        // back the root's or the earlier file's own addresses.
        let new_addr = mr2.create_file_node().unwrap();
        assert_ne!(new_addr, root);
        assert_ne!(new_addr, file_addr);
    }
}
