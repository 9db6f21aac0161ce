//! Flat indexed view of a node's data blocks: 12 direct, 1 indirect and 1
//! double-indirect pointer, each a 32-bit block index relative to the first
//! data block of the volume.

use crate::address::{Address, BLOCK_SIZE, DIRECT_BLOCKS, MAX_BLOCKS_PER_NODE, POINTERS_PER_BLOCK};
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};

/// Byte offset of `num_blocks_allocated` within a node header.
pub const HEADER_OFFSET: u64 = 25;
const DIRECT_OFFSET: u64 = HEADER_OFFSET + 4;
const INDIRECT_OFFSET: u64 = DIRECT_OFFSET + 4 * DIRECT_BLOCKS;
const DOUBLE_INDIRECT_OFFSET: u64 = INDIRECT_OFFSET + 4;
/// Total on-disk size of the block-address-storage record.
pub const STORAGE_SIZE: u64 = DOUBLE_INDIRECT_OFFSET + 4 - HEADER_OFFSET;

/// Allocates and frees data blocks on behalf of a node. Implemented by
/// `MasterRecord`; kept as a trait so `BlockAddressStorage` does not need to
/// know about the master record, the live-node cache, or block groups.
pub trait BlockAllocator: Send + Sync {
    fn allocate_blocks(&self, n: u64) -> Result<Vec<Address>>;
    fn free_blocks(&self, addrs: &[Address]) -> Result<()>;
    /// Address of the first data block in the volume; block indices are
    /// relative to this address.
    fn global_blocks_start(&self) -> Address;
}

/// In-memory mirror of a node's block-address-storage record. Every
/// mutation is immediately persisted at its on-disk location via `disk`.
#[derive(Debug, Clone, Default)]
pub struct BlockAddressStorage {
    pub num_blocks_allocated: u64,
    direct: [u32; DIRECT_BLOCKS as usize],
    indirect: u32,
    double_indirect: u32,
}

impl BlockAddressStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the record from the node header at `header_address`.
    pub fn load(disk: &DiskAccess, header_address: Address) -> Result<Self> {
        let mut off = header_address.as_u64() + HEADER_OFFSET;
        let num_blocks_allocated = disk.read_u32(&mut off)? as u64;
        let mut direct = [0u32; DIRECT_BLOCKS as usize];
        for slot in direct.iter_mut() {
            *slot = disk.read_u32(&mut off)?;
        }
        let indirect = disk.read_u32(&mut off)?;
        let double_indirect = disk.read_u32(&mut off)?;
        Ok(Self {
            num_blocks_allocated,
            direct,
            indirect,
            double_indirect,
        })
    }

    /// Writes the whole record to the node header at `header_address`.
    pub fn save(&self, disk: &DiskAccess, header_address: Address) -> Result<()> {
        let mut off = header_address.as_u64() + HEADER_OFFSET;
        disk.write_u32(&mut off, self.num_blocks_allocated as u32)?;
        for slot in self.direct.iter() {
            disk.write_u32(&mut off, *slot)?;
        }
        disk.write_u32(&mut off, self.indirect)?;
        disk.write_u32(&mut off, self.double_indirect)?;
        Ok(())
    }

    fn persist_num_blocks(&self, disk: &DiskAccess, header_address: Address) -> Result<()> {
        let mut off = header_address.as_u64() + HEADER_OFFSET;
        disk.write_u32(&mut off, self.num_blocks_allocated as u32)
    }

    fn persist_direct(&self, disk: &DiskAccess, header_address: Address, i: usize) -> Result<()> {
        let mut off = header_address.as_u64() + DIRECT_OFFSET + 4 * i as u64;
        disk.write_u32(&mut off, self.direct[i])
    }

    fn persist_indirect(&self, disk: &DiskAccess, header_address: Address) -> Result<()> {
        let mut off = header_address.as_u64() + INDIRECT_OFFSET;
        disk.write_u32(&mut off, self.indirect)
    }

    fn persist_double_indirect(&self, disk: &DiskAccess, header_address: Address) -> Result<()> {
        let mut off = header_address.as_u64() + DOUBLE_INDIRECT_OFFSET;
        disk.write_u32(&mut off, self.double_indirect)
    }

    fn index_to_address(&self, allocator: &dyn BlockAllocator, index: u32) -> Address {
        allocator.global_blocks_start().add_blocks(index as u64)
    }

    fn read_page_slot(&self, disk: &DiskAccess, page_index: u32, slot: u64, allocator: &dyn BlockAllocator) -> Result<u32> {
        let page_addr = self.index_to_address(allocator, page_index);
        let mut off = page_addr.as_u64() + slot * 4;
        disk.read_u32(&mut off)
    }

    fn write_page_slot(&self, disk: &DiskAccess, page_index: u32, slot: u64, value: u32, allocator: &dyn BlockAllocator) -> Result<()> {
        let page_addr = self.index_to_address(allocator, page_index);
        let mut off = page_addr.as_u64() + slot * 4;
        disk.write_u32(&mut off, value)
    }

    fn zero_page(&self, disk: &DiskAccess, page_index: u32, allocator: &dyn BlockAllocator) -> Result<()> {
        let page_addr = self.index_to_address(allocator, page_index);
        let zeros = vec![0u8; BLOCK_SIZE as usize];
        let mut off = page_addr.as_u64();
        disk.write_bytes(&mut off, &zeros)
    }

    /// Maps a zero-based logical block index to its absolute `Address`.
    pub fn get_block_start_address(
        &self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        index: u64,
    ) -> Result<Address> {
        if index >= self.num_blocks_allocated {
            return Err(Error::Corruption(format!(
                "block index {index} out of range ({} allocated)",
                self.num_blocks_allocated
            )));
        }
        if index < DIRECT_BLOCKS {
            return Ok(self.index_to_address(allocator, self.direct[index as usize]));
        }
        let i = index - DIRECT_BLOCKS;
        if i < POINTERS_PER_BLOCK {
            if self.indirect == 0 {
                return Err(Error::Corruption("missing indirect page".into()));
            }
            let block_index = self.read_page_slot(disk, self.indirect, i, allocator)?;
            return Ok(self.index_to_address(allocator, block_index));
        }
        let j = i - POINTERS_PER_BLOCK;
        if self.double_indirect == 0 {
            return Err(Error::Corruption("missing double-indirect page".into()));
        }
        let page_idx = j / POINTERS_PER_BLOCK;
        let slot = j % POINTERS_PER_BLOCK;
        let inner_page = self.read_page_slot(disk, self.double_indirect, page_idx, allocator)?;
        if inner_page == 0 {
            return Err(Error::Corruption("missing inner indirect page".into()));
        }
        let block_index = self.read_page_slot(disk, inner_page, slot, allocator)?;
        Ok(self.index_to_address(allocator, block_index))
    }

    /// Appends `k` data blocks, allocating pointer pages as needed. Refuses
    /// if the node would exceed `D + P + P^2` blocks.
    pub fn add_blocks(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        header_address: Address,
        k: u64,
    ) -> Result<()> {
        if self.num_blocks_allocated + k > MAX_BLOCKS_PER_NODE {
            return Err(Error::MaxFileSize);
        }
        let new_addrs = allocator.allocate_blocks(k)?;
        for addr in new_addrs {
            let index = ((addr.as_u64() - allocator.global_blocks_start().as_u64()) / BLOCK_SIZE) as u32;
            let logical = self.num_blocks_allocated;

            if logical < DIRECT_BLOCKS {
                self.direct[logical as usize] = index;
                self.persist_direct(disk, header_address, logical as usize)?;
            } else if logical - DIRECT_BLOCKS < POINTERS_PER_BLOCK {
                if self.indirect == 0 {
                    let page = allocator.allocate_blocks(1)?;
                    let page_addr = page[0];
                    let page_index = ((page_addr.as_u64() - allocator.global_blocks_start().as_u64()) / BLOCK_SIZE) as u32;
                    self.indirect = page_index;
                    self.zero_page(disk, self.indirect, allocator)?;
                    self.persist_indirect(disk, header_address)?;
                }
                let slot = logical - DIRECT_BLOCKS;
                self.write_page_slot(disk, self.indirect, slot, index, allocator)?;
            } else {
                if self.double_indirect == 0 {
                    let page = allocator.allocate_blocks(1)?;
                    let page_addr = page[0];
                    let page_index = ((page_addr.as_u64() - allocator.global_blocks_start().as_u64()) / BLOCK_SIZE) as u32;
                    self.double_indirect = page_index;
                    self.zero_page(disk, self.double_indirect, allocator)?;
                    self.persist_double_indirect(disk, header_address)?;
                }
                let j = logical - DIRECT_BLOCKS - POINTERS_PER_BLOCK;
                let page_idx = j / POINTERS_PER_BLOCK;
                let slot = j % POINTERS_PER_BLOCK;
                let mut inner_page = self.read_page_slot(disk, self.double_indirect, page_idx, allocator)?;
                if inner_page == 0 {
                    let page = allocator.allocate_blocks(1)?;
                    let page_addr = page[0];
                    inner_page = ((page_addr.as_u64() - allocator.global_blocks_start().as_u64()) / BLOCK_SIZE) as u32;
                    self.zero_page(disk, inner_page, allocator)?;
                    self.write_page_slot(disk, self.double_indirect, page_idx, inner_page, allocator)?;
                }
                self.write_page_slot(disk, inner_page, slot, index, allocator)?;
            }

            self.num_blocks_allocated = logical + 1;
            self.persist_num_blocks(disk, header_address)?;
        }
        Ok(())
    }

    /// Frees the last `n` data blocks, eagerly releasing pointer pages that
    /// become empty.
    pub fn free_last_blocks(
        &mut self,
        disk: &DiskAccess,
        allocator: &dyn BlockAllocator,
        header_address: Address,
        n: u64,
    ) -> Result<()> {
        if n > self.num_blocks_allocated {
            return Err(Error::Corruption("freeing more blocks than allocated".into()));
        }
        for _ in 0..n {
            let logical = self.num_blocks_allocated - 1;
            let addr = self.get_block_start_address(disk, allocator, logical)?;
            allocator.free_blocks(&[addr])?;

            if logical < DIRECT_BLOCKS {
                self.direct[logical as usize] = 0;
                self.persist_direct(disk, header_address, logical as usize)?;
            } else if logical - DIRECT_BLOCKS < POINTERS_PER_BLOCK {
                let slot = logical - DIRECT_BLOCKS;
                self.write_page_slot(disk, self.indirect, slot, 0, allocator)?;
                if logical == DIRECT_BLOCKS {
                    let page_addr = self.index_to_address(allocator, self.indirect);
                    allocator.free_blocks(&[page_addr])?;
                    self.indirect = 0;
                    self.persist_indirect(disk, header_address)?;
                }
            } else {
                let j = logical - DIRECT_BLOCKS - POINTERS_PER_BLOCK;
                let page_idx = j / POINTERS_PER_BLOCK;
                let slot = j % POINTERS_PER_BLOCK;
                let inner_page = self.read_page_slot(disk, self.double_indirect, page_idx, allocator)?;
                self.write_page_slot(disk, inner_page, slot, 0, allocator)?;
                if slot == 0 {
                    let inner_addr = self.index_to_address(allocator, inner_page);
                    allocator.free_blocks(&[inner_addr])?;
                    self.write_page_slot(disk, self.double_indirect, page_idx, 0, allocator)?;
                }
                if logical == DIRECT_BLOCKS + POINTERS_PER_BLOCK {
                    let page_addr = self.index_to_address(allocator, self.double_indirect);
                    allocator.free_blocks(&[page_addr])?;
                    self.double_indirect = 0;
                    self.persist_double_indirect(disk, header_address)?;
                }
            }

            self.num_blocks_allocated = logical;
            self.persist_num_blocks(disk, header_address)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A bump allocator over an in-memory byte vector, standing in for
    /// `MasterRecord` in unit tests of the addressing tiers.
    struct MockAllocator {
        disk: DiskAccess,
        next: AtomicU64,
        freed: Mutex<Vec<Address>>,
        start: Address,
    }

    impl MockAllocator {
        fn new(blocks: u64) -> Self {
            use crate::disk_access::FileStore;
            let file = tempfile::tempfile().unwrap();
            file.set_len(blocks * BLOCK_SIZE).unwrap();
            Self {
                disk: DiskAccess::new(Box::new(FileStore::new(file))),
                // Block index 0 is reserved for the node header itself.
                next: AtomicU64::new(1),
                freed: Mutex::new(Vec::new()),
                start: Address(0),
            }
        }
    }

    impl BlockAllocator for MockAllocator {
        fn allocate_blocks(&self, n: u64) -> Result<Vec<Address>> {
            let mut out = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let idx = self.next.fetch_add(1, Ordering::SeqCst);
                out.push(self.start.add_blocks(idx));
            }
            Ok(out)
        }

        fn free_blocks(&self, addrs: &[Address]) -> Result<()> {
            self.freed.lock().unwrap().extend_from_slice(addrs);
            Ok(())
        }

        fn global_blocks_start(&self) -> Address {
            self.start
        }
    }

    #[test]
    fn grows_through_direct_indirect_and_double_indirect_tiers() {
        let alloc = MockAllocator::new(3000);
        let header = Address(0);
        // Reserve the header's own 128 bytes so pointer pages never alias it.
        let mut storage = BlockAddressStorage::new();
        storage
            .add_blocks(&alloc.disk, &alloc, header, 2000)
            .unwrap();

        assert!(storage
            .get_block_start_address(&alloc.disk, &alloc, 12)
            .is_ok());
        assert!(storage
            .get_block_start_address(&alloc.disk, &alloc, 1024)
            .is_ok());
        assert!(storage
            .get_block_start_address(&alloc.disk, &alloc, 1036)
            .is_ok());
        assert!(storage
            .get_block_start_address(&alloc.disk, &alloc, 1999)
            .is_ok());
        assert!(storage
            .get_block_start_address(&alloc.disk, &alloc, 2000)
            .is_err());

        storage
            .free_last_blocks(&alloc.disk, &alloc, header, 2000)
            .unwrap();
        assert_eq!(storage.num_blocks_allocated, 0);
        // Every allocated block, including the indirect/double-indirect
        // pages themselves, was eventually freed.
        let freed = alloc.freed.lock().unwrap();
        assert_eq!(freed.len() as u64, alloc.next.load(Ordering::SeqCst) - 1);
    }

    #[test]
    fn refuses_growth_past_maximum_file_size() {
        let alloc = MockAllocator::new(10);
        let mut storage = BlockAddressStorage::new();
        storage.num_blocks_allocated = MAX_BLOCKS_PER_NODE;
        let err = storage
            .add_blocks(&alloc.disk, &alloc, Address(0), 1)
            .unwrap_err();
        assert!(matches!(err, Error::MaxFileSize));
    }
}
