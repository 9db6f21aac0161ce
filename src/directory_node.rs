//! In-memory view of a directory's entry chain: lookup, insertion with
//! in-place resurrection, deletion, pattern search, and periodic
//! compaction.

use crate::address::{Address, BLOCK_SIZE};
use crate::block_address_storage::BlockAllocator;
use crate::directory_entry::{self, DirectoryEntry};
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};
use crate::node::NodeCore;
use crate::pattern::SearchPattern;

/// Entries are recompacted after this many insertions, bounding how far
/// deleted slots can accumulate between compactions.
const AUTO_SAVE_INSERT_THRESHOLD: u64 = 100;

pub struct DirectoryNode {
    pub core: NodeCore,
    entries: Vec<DirectoryEntry>,
    inserts_since_save: u64,
}

impl DirectoryNode {
    /// Creates a brand-new directory with one data block allocated for its
    /// entry chain, seeded with a `.` entry pointing at itself and, when
    /// `parent` is given, a `..` entry pointing at it. The root directory is
    /// created with `parent = None` and so carries only `.`.
    pub fn create(
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        header_address: Address,
        parent: Option<Address>,
    ) -> Result<Self> {
        let mut core = NodeCore::new(header_address, true);
        core.blocks.add_blocks(disk, allocator, header_address, 1)?;
        core.save(disk)?;
        let mut node = Self {
            core,
            entries: Vec::new(),
            inserts_since_save: 0,
        };
        node.add_child_entry(disk, allocator, ".", true, header_address)?;
        if let Some(parent_address) = parent {
            node.add_child_entry(disk, allocator, "..", true, parent_address)?;
        }
        Ok(node)
    }

    /// Loads a directory node and its full entry chain (including deleted
    /// entries) from disk.
    pub fn load(
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        header_address: Address,
    ) -> Result<Self> {
        let core = NodeCore::load(disk, header_address)?;
        if !core.is_directory {
            return Err(Error::WrongKind("node is not a directory".into()));
        }
        let mut entries = Vec::new();
        if core.blocks.num_blocks_allocated > 0 {
            let mut addr = core.blocks.get_block_start_address(disk, allocator, 0)?;
            loop {
                let entry = DirectoryEntry::load(disk, addr)?;
                let next = entry.next_entry_address;
                entries.push(entry);
                if next == Address(0) {
                    break;
                }
                addr = next;
            }
        }

        // Recover exact frozen slot sizes from the gap to the next entry in
        // the same block; an entry that is last in its block keeps the
        // provisional `required_size(name)` estimate `DirectoryEntry::load`
        // already set, since nothing on disk distinguishes a shrunk
        // resurrected slot from a fresh one once it has no live neighbor to
        // measure against.
        for i in 0..entries.len().saturating_sub(1) {
            let this_addr = entries[i].self_address().unwrap().as_u64();
            let next_addr = entries[i + 1].self_address().unwrap().as_u64();
            if this_addr / BLOCK_SIZE == next_addr / BLOCK_SIZE {
                entries[i].entry_size_bytes = next_addr - this_addr;
            }
        }

        Ok(Self {
            core,
            entries,
            inserts_since_save: 0,
        })
    }

    fn block_of(addr: Address) -> u64 {
        addr.as_u64() / BLOCK_SIZE
    }

    fn find_live_index(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_deleted() && e.name.eq_ignore_ascii_case(name))
    }

    pub fn find_child_entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.find_live_index(name).map(|i| &self.entries[i])
    }

    fn is_dot_entry(name: &str) -> bool {
        name == "." || name == ".."
    }

    /// Names of non-deleted entries matching `pattern`, excluding `.` and
    /// `..`.
    pub fn find_matching_entries(&self, pattern: &SearchPattern) -> Vec<&DirectoryEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_deleted() && !Self::is_dot_entry(&e.name) && pattern.matches(&e.name))
            .collect()
    }

    /// All live child entries, excluding `.` and `..`.
    pub fn all_child_entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_deleted() && !Self::is_dot_entry(&e.name))
    }

    /// True iff the directory has no children other than `.`/`..`.
    pub fn is_empty(&self) -> bool {
        self.all_child_entries().next().is_none()
    }

    /// Appends a new live entry, reusing a sufficiently large deleted slot
    /// in place when one exists. Fails with [`Error::AlreadyExists`] if a
    /// live entry with the same (case-insensitive) name is already present.
    pub fn add_child_entry(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        name: &str,
        is_directory: bool,
        target: Address,
    ) -> Result<()> {
        if self.find_live_index(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let required = directory_entry::required_size(name.encode_utf16().count());
        let resurrection = self
            .entries
            .iter()
            .position(|e| e.is_deleted() && e.entry_size_bytes() >= required);

        if let Some(idx) = resurrection {
            let entry = &mut self.entries[idx];
            let address = entry.self_address().expect("loaded or saved entry");
            entry.resurrect(name, is_directory, target)?;
            entry.save(disk, address)?;
        } else {
            self.append_new_entry(disk, allocator, name, is_directory, target, required)?;
        }

        self.core.touch_modified();
        self.core.save(disk)?;

        self.inserts_since_save += 1;
        if self.inserts_since_save >= AUTO_SAVE_INSERT_THRESHOLD {
            self.save(disk, allocator)?;
        }
        Ok(())
    }

    fn append_new_entry(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        name: &str,
        is_directory: bool,
        target: Address,
        required: u64,
    ) -> Result<()> {
        let mut new_entry = DirectoryEntry::new(name, is_directory, target)?;

        let placement = match self.entries.last() {
            None => self.core.blocks.get_block_start_address(disk, allocator, 0)?,
            Some(tail) => {
                let tail_addr = tail.self_address().expect("saved tail entry").as_u64();
                let tail_end = tail_addr + tail.entry_size_bytes();
                let block_end = (tail_addr / BLOCK_SIZE + 1) * BLOCK_SIZE;
                if block_end - tail_end >= required {
                    Address(tail_end)
                } else {
                    let new_block_index = self.core.blocks.num_blocks_allocated;
                    self.core
                        .blocks
                        .add_blocks(disk, allocator, self.core.header_address, 1)?;
                    self.core
                        .blocks
                        .get_block_start_address(disk, allocator, new_block_index)?
                }
            }
        };

        new_entry.save(disk, placement)?;
        if let Some(tail) = self.entries.last_mut() {
            tail.next_entry_address = placement;
            let tail_addr = tail.self_address().expect("saved tail entry");
            tail.save(disk, tail_addr)?;
        }
        self.entries.push(new_entry);
        self.core.size += 1;
        Ok(())
    }

    /// Marks a live entry deleted and persists the flag change. Returns the
    /// removed entry (including its target node address) so the caller can
    /// decide what to do with the node it pointed at.
    pub fn find_and_remove_child_entry(
        &mut self,
        disk: &DiskAccess,
        name: &str,
    ) -> Result<DirectoryEntry> {
        let idx = self
            .find_live_index(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let entry = &mut self.entries[idx];
        entry.mark_deleted();
        let address = entry.self_address().expect("loaded or saved entry");
        entry.save(disk, address)?;
        self.core.touch_modified();
        self.core.save(disk)?;
        Ok(entry.clone())
    }

    /// Rebuilds the entry chain from only the live entries, packing them
    /// contiguously block by block and dropping deleted slots entirely.
    /// Grows or shrinks the node's allocated blocks to match.
    pub fn save(&mut self, disk: &DiskAccess, allocator: &dyn BlockAllocator) -> Result<()> {
        let live: Vec<DirectoryEntry> = self
            .entries
            .drain(..)
            .filter(|e| !e.is_deleted())
            .collect();

        let mut blocks_used = if live.is_empty() { 1 } else { 0u64 };
        let mut rebuilt = Vec::with_capacity(live.len());
        let mut cursor_in_block = 0u64;
        let mut block_index = 0u64;

        for mut entry in live {
            let size = directory_entry::required_size(entry.name_len_code_units());
            if blocks_used == 0 || cursor_in_block + size > BLOCK_SIZE {
                block_index = blocks_used;
                blocks_used += 1;
                cursor_in_block = 0;
            }
            while self.core.blocks.num_blocks_allocated <= block_index {
                self.core
                    .blocks
                    .add_blocks(disk, allocator, self.core.header_address, 1)?;
            }
            let block_addr =
                self.core
                    .blocks
                    .get_block_start_address(disk, allocator, block_index)?;
            let address = block_addr.add_bytes(cursor_in_block);
            entry.next_entry_address = Address(0);
            // Compaction always lays an entry out at exactly its current
            // required size, discarding whatever larger slot it held
            // in-memory before resurrection.
            entry.entry_size_bytes = size;
            entry.save(disk, address)?;
            cursor_in_block += size;
            rebuilt.push(entry);
        }

        for i in 0..rebuilt.len().saturating_sub(1) {
            let next_addr = rebuilt[i + 1].self_address().unwrap();
            rebuilt[i].next_entry_address = next_addr;
            let addr = rebuilt[i].self_address().unwrap();
            rebuilt[i].save(disk, addr)?;
        }

        let currently_allocated = self.core.blocks.num_blocks_allocated;
        if currently_allocated > blocks_used {
            self.core.blocks.free_last_blocks(
                disk,
                allocator,
                self.core.header_address,
                currently_allocated - blocks_used,
            )?;
        }

        self.core.size = rebuilt.len() as u64;
        self.entries = rebuilt;
        self.inserts_since_save = 0;
        self.core.touch_modified();
        self.core.save(disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_access::FileStore;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct MockAllocator {
        disk: DiskAccess,
        next: AtomicU64,
        freed: Mutex<Vec<Address>>,
    }

    impl MockAllocator {
        fn new(blocks: u64) -> Self {
            let file = tempfile::tempfile().unwrap();
            file.set_len(blocks * BLOCK_SIZE).unwrap();
            Self {
                disk: DiskAccess::new(Box::new(FileStore::new(file))),
                next: AtomicU64::new(1),
                freed: Mutex::new(Vec::new()),
            }
        }
    }

    impl BlockAllocator for MockAllocator {
        fn allocate_blocks(&self, n: u64) -> Result<Vec<Address>> {
            let mut out = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let idx = self.next.fetch_add(1, Ordering::SeqCst);
                out.push(Address(idx * BLOCK_SIZE));
            }
            Ok(out)
        }

        fn free_blocks(&self, addrs: &[Address]) -> Result<()> {
            self.freed.lock().unwrap().extend_from_slice(addrs);
            Ok(())
        }

        fn global_blocks_start(&self) -> Address {
            Address(0)
        }
    }

    #[test]
    fn create_add_find_and_remove_round_trip() {
        let alloc = MockAllocator::new(200);
        let header = Address(0);
        let mut dir = DirectoryNode::create(&alloc.disk, &alloc, header, None).unwrap();

        dir.add_child_entry(&alloc.disk, &alloc, "foo.txt", false, Address(4096 * 50))
            .unwrap();
        dir.add_child_entry(&alloc.disk, &alloc, "bar", true, Address(4096 * 60))
            .unwrap();

        assert!(dir.find_child_entry("FOO.TXT").is_some());
        assert!(dir
            .add_child_entry(&alloc.disk, &alloc, "foo.TXT", false, Address(4096 * 70))
            .is_err());

        let removed = dir.find_and_remove_child_entry(&alloc.disk, "foo.txt").unwrap();
        assert_eq!(removed.target_node_address, Address(4096 * 50));
        assert!(dir.find_child_entry("foo.txt").is_none());
    }

    #[test]
    fn deleted_slot_is_reused_when_large_enough() {
        let alloc = MockAllocator::new(200);
        let header = Address(0);
        let mut dir = DirectoryNode::create(&alloc.disk, &alloc, header, None).unwrap();

        dir.add_child_entry(&alloc.disk, &alloc, "averylongname", false, Address(4096 * 10))
            .unwrap();
        dir.find_and_remove_child_entry(&alloc.disk, "averylongname")
            .unwrap();
        dir.add_child_entry(&alloc.disk, &alloc, "ab", true, Address(4096 * 20))
            .unwrap();

        let reloaded = DirectoryNode::load(&alloc.disk, &alloc, header).unwrap();
        let entry = reloaded.find_child_entry("ab").unwrap();
        assert!(entry.is_directory());
        assert_eq!(entry.target_node_address, Address(4096 * 20));
    }

    #[test]
    fn save_compacts_away_deleted_entries() {
        let alloc = MockAllocator::new(200);
        let header = Address(0);
        let mut dir = DirectoryNode::create(&alloc.disk, &alloc, header, None).unwrap();

        for i in 0..5 {
            dir.add_child_entry(
                &alloc.disk,
                &alloc,
                &format!("file{i}"),
                false,
                Address(4096 * (10 + i)),
            )
            .unwrap();
        }
        dir.find_and_remove_child_entry(&alloc.disk, "file2").unwrap();
        dir.save(&alloc.disk, &alloc).unwrap();

        assert_eq!(dir.core.size, 4);
        assert!(dir.find_child_entry("file2").is_none());
        assert!(dir.find_child_entry("file3").is_some());
    }

    #[test]
    fn reload_after_save_preserves_chain_order() {
        let alloc = MockAllocator::new(200);
        let header = Address(0);
        let mut dir = DirectoryNode::create(&alloc.disk, &alloc, header, None).unwrap();
        for i in 0..10 {
            dir.add_child_entry(
                &alloc.disk,
                &alloc,
                &format!("n{i}"),
                false,
                Address(4096 * (30 + i)),
            )
            .unwrap();
        }
        dir.save(&alloc.disk, &alloc).unwrap();

        let reloaded = DirectoryNode::load(&alloc.disk, &alloc, header).unwrap();
        assert_eq!(reloaded.all_child_entries().count(), 10);
    }
}
