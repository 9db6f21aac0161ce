//! A contiguous run of blocks with its own block and node bitmaps,
//! serialising allocation and deallocation of its own resources.

use parking_lot::Mutex;

use crate::address::{
    Address, BLOCKS_FOR_NODE_TABLE, BLOCKS_PER_GROUP, NODES_PER_GROUP, NODE_BITMAP_SIZE_BLOCKS,
    BLOCK_SIZE, RESERVED_BLOCKS,
};
use crate::bitmap::DataBitmap;
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};

/// Header summarising a group, as persisted in the master record.
#[derive(Debug, Clone, Copy)]
pub struct BlockGroupDescriptor {
    pub bitmaps_address: Address,
    pub free_blocks_in_group: u32,
    pub free_nodes_in_group: u32,
}

/// On-disk size of one descriptor: `bitmaps_address` (8B) + two `u32`
/// counts (4B each).
pub const DESCRIPTOR_SIZE: u64 = 8 + 4 + 4;

impl BlockGroupDescriptor {
    pub fn load(disk: &DiskAccess, offset: u64) -> Result<Self> {
        let mut off = offset;
        let bitmaps_address = Address(disk.read_u64(&mut off)?);
        let free_blocks_in_group = disk.read_u32(&mut off)?;
        let free_nodes_in_group = disk.read_u32(&mut off)?;
        Ok(Self {
            bitmaps_address,
            free_blocks_in_group,
            free_nodes_in_group,
        })
    }

    pub fn save(&self, disk: &DiskAccess, offset: u64) -> Result<()> {
        let mut off = offset;
        disk.write_u64(&mut off, self.bitmaps_address.as_u64())?;
        disk.write_u32(&mut off, self.free_blocks_in_group)?;
        disk.write_u32(&mut off, self.free_nodes_in_group)?;
        Ok(())
    }
}

struct GroupState {
    block_bitmap: DataBitmap,
    node_bitmap: DataBitmap,
    free_blocks: u32,
    free_nodes: u32,
}

/// A block group: its bitmaps address, its size, and a mutex serialising
/// allocation within it.
pub struct BlockGroup {
    bitmaps_address: Address,
    /// Total blocks owned by this group, including the reserved prefix.
    size_blocks: u64,
    state: Mutex<GroupState>,
}

impl BlockGroup {
    fn node_table_start(&self) -> Address {
        self.bitmaps_address
            .add_blocks(1 + NODE_BITMAP_SIZE_BLOCKS)
    }

    fn data_blocks_start(&self) -> Address {
        self.bitmaps_address.add_blocks(RESERVED_BLOCKS)
    }

    /// Creates a fresh, empty group at `bitmaps_address` spanning
    /// `size_blocks` blocks (the last group in a volume may be smaller than
    /// `BLOCKS_PER_GROUP`).
    pub fn new(bitmaps_address: Address, size_blocks: u64) -> Self {
        let mut block_bitmap = DataBitmap::new(BLOCKS_PER_GROUP as usize);
        block_bitmap.reserve_beginning(RESERVED_BLOCKS as usize);
        // Blocks past this group's actual size (the short last group) are
        // marked used so they are never handed out.
        for i in size_blocks..BLOCKS_PER_GROUP {
            block_bitmap.mark_used(i as usize);
        }
        let node_bitmap = DataBitmap::new(NODES_PER_GROUP as usize);
        let free_blocks = (size_blocks - RESERVED_BLOCKS) as u32;
        let free_nodes = NODES_PER_GROUP as u32;
        Self {
            bitmaps_address,
            size_blocks,
            state: Mutex::new(GroupState {
                block_bitmap,
                node_bitmap,
                free_blocks,
                free_nodes,
            }),
        }
    }

    /// Loads a group from its persisted bitmaps, given the descriptor's free
    /// counts (already known from the master record).
    pub fn load(
        disk: &DiskAccess,
        bitmaps_address: Address,
        size_blocks: u64,
        free_blocks: u32,
        free_nodes: u32,
    ) -> Result<Self> {
        let block_bitmap = DataBitmap::load(disk, bitmaps_address.as_u64(), BLOCKS_PER_GROUP as usize)?;
        let node_bitmap_addr = bitmaps_address.add_blocks(1);
        let node_bitmap = DataBitmap::load(disk, node_bitmap_addr.as_u64(), NODES_PER_GROUP as usize)?;
        Ok(Self {
            bitmaps_address,
            size_blocks,
            state: Mutex::new(GroupState {
                block_bitmap,
                node_bitmap,
                free_blocks,
                free_nodes,
            }),
        })
    }

    /// Persists both bitmaps at `bitmaps_address`.
    pub fn save(&self, disk: &DiskAccess) -> Result<()> {
        let state = self.state.lock();
        state.block_bitmap.save(disk, self.bitmaps_address.as_u64())?;
        let node_bitmap_addr = self.bitmaps_address.add_blocks(1);
        state.node_bitmap.save(disk, node_bitmap_addr.as_u64())?;
        Ok(())
    }

    /// Copies out the group's summary for the master record.
    pub fn descriptor(&self) -> BlockGroupDescriptor {
        let state = self.state.lock();
        BlockGroupDescriptor {
            bitmaps_address: self.bitmaps_address,
            free_blocks_in_group: state.free_blocks,
            free_nodes_in_group: state.free_nodes,
        }
    }

    /// Allocates the first free block in this group, returning its address,
    /// or `None` if the group is full.
    pub fn allocate_new_block(&self) -> Option<Address> {
        let mut state = self.state.lock();
        let index = state.block_bitmap.allocate_first_free()?;
        state.free_blocks -= 1;
        Some(self.bitmaps_address.add_blocks(index as u64))
    }

    /// Allocates the first free node slot in this group, returning its
    /// absolute header address, or `None` if the group is full.
    pub fn allocate_new_node(&self) -> Option<Address> {
        let mut state = self.state.lock();
        let index = state.node_bitmap.allocate_first_free()?;
        state.free_nodes -= 1;
        Some(self.node_table_start().add_bytes(index as u64 * crate::address::NODE_SIZE))
    }

    /// Frees a previously-allocated block. Rejects addresses outside this
    /// group, unaligned addresses, the reserved prefix, and double-frees.
    pub fn free_block(&self, addr: Address) -> Result<()> {
        if !addr.is_block_aligned() {
            return Err(Error::Corruption("block address not on a block boundary".into()));
        }
        if !self.contains_block(addr) {
            return Err(Error::Corruption("block address outside group's data region".into()));
        }
        let index = (addr.as_u64() - self.bitmaps_address.as_u64()) / BLOCK_SIZE;
        let mut state = self.state.lock();
        if !state.block_bitmap.deallocate(index as usize) {
            return Err(Error::Corruption("double free of a block".into()));
        }
        state.free_blocks += 1;
        Ok(())
    }

    /// Frees a previously-allocated node slot. Rejects addresses outside
    /// the node table, unaligned addresses, and double-frees.
    pub fn free_node(&self, addr: Address) -> Result<()> {
        let table_start = self.node_table_start();
        let table_size = BLOCKS_FOR_NODE_TABLE * BLOCK_SIZE;
        if !addr.in_range(table_start, table_size) {
            return Err(Error::Corruption("node address outside node table".into()));
        }
        let rel = addr.as_u64() - table_start.as_u64();
        if rel % crate::address::NODE_SIZE != 0 {
            return Err(Error::Corruption("node address not on a node boundary".into()));
        }
        let index = rel / crate::address::NODE_SIZE;
        let mut state = self.state.lock();
        if !state.node_bitmap.deallocate(index as usize) {
            return Err(Error::Corruption("double free of a node".into()));
        }
        state.free_nodes += 1;
        Ok(())
    }

    pub fn free_blocks_count(&self) -> u32 {
        self.state.lock().free_blocks
    }

    pub fn free_nodes_count(&self) -> u32 {
        self.state.lock().free_nodes
    }

    pub fn bitmaps_address(&self) -> Address {
        self.bitmaps_address
    }

    pub fn size_blocks(&self) -> u64 {
        self.size_blocks
    }

    pub fn contains_block(&self, addr: Address) -> bool {
        addr.in_range(self.data_blocks_start(), (self.size_blocks - RESERVED_BLOCKS) * BLOCK_SIZE)
    }

    pub fn contains_node(&self, addr: Address) -> bool {
        addr.in_range(self.node_table_start(), BLOCKS_FOR_NODE_TABLE * BLOCK_SIZE)
    }
}
