//! A single directory entry: flags, target node, successor pointer, and a
//! UTF-16 name. Entry size is padded to a 4-byte boundary and frozen the
//! first time the entry is written; resurrection reuses the frozen slot
//! without shrinking it.

use crate::address::Address;
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};

const FLAG_DELETED: u8 = 1 << 0;
const FLAG_DIRECTORY: u8 = 1 << 1;

/// Fixed header portion of an entry: flags (1B) + target (8B) + next (8B) +
/// name_length (1B).
const FIXED_HEADER_BYTES: u64 = 1 + 8 + 8 + 1;

/// Returns the 4-byte-aligned on-disk size of an entry whose name is
/// `name_len_code_units` UTF-16 code units long.
pub fn required_size(name_len_code_units: usize) -> u64 {
    let raw = FIXED_HEADER_BYTES + 2 * name_len_code_units as u64;
    raw.div_ceil(4) * 4
}

/// A directory entry as held in memory. `entry_size_bytes` is the engine's
/// best knowledge of the entry's frozen on-disk footprint: exact once this
/// entry or its successor has been saved or its neighbor gap measured,
/// `required_size(name)` as a provisional estimate otherwise.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    flags: u8,
    pub target_node_address: Address,
    pub next_entry_address: Address,
    pub name: String,
    pub(crate) entry_size_bytes: u64,
    pub(crate) self_address: Option<Address>,
    frozen: bool,
}

impl DirectoryEntry {
    /// Creates a brand-new, unsaved entry. `name` must be 1..=255 UTF-16
    /// code units.
    pub fn new(name: &str, is_directory: bool, target: Address) -> Result<Self> {
        let units = name.encode_utf16().count();
        if units == 0 || units > 255 {
            return Err(Error::InvalidPath(format!(
                "name length {units} outside 1..=255"
            )));
        }
        let mut flags = 0;
        if is_directory {
            flags |= FLAG_DIRECTORY;
        }
        Ok(Self {
            flags,
            target_node_address: target,
            next_entry_address: Address(0),
            name: name.to_string(),
            entry_size_bytes: required_size(units),
            self_address: None,
            frozen: false,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    pub fn self_address(&self) -> Option<Address> {
        self.self_address
    }

    pub fn name_len_code_units(&self) -> usize {
        self.name.encode_utf16().count()
    }

    /// The entry's frozen (or best-known) on-disk footprint.
    pub fn entry_size_bytes(&self) -> u64 {
        self.entry_size_bytes
    }

    /// Marks the entry deleted in memory; callers are responsible for
    /// persisting the flag change.
    pub fn mark_deleted(&mut self) {
        self.flags |= FLAG_DELETED;
    }

    /// Reuses a deleted slot for a new `(name, is_directory, target)`,
    /// provided the slot is at least as large as the new entry would
    /// require. Does not change `entry_size_bytes`.
    pub fn resurrect(&mut self, name: &str, is_directory: bool, target: Address) -> Result<()> {
        if !self.is_deleted() {
            return Err(Error::Corruption("resurrect called on a live entry".into()));
        }
        let units = name.encode_utf16().count();
        if units == 0 || units > 255 {
            return Err(Error::InvalidPath(format!(
                "name length {units} outside 1..=255"
            )));
        }
        if required_size(units) > self.entry_size_bytes {
            return Err(Error::Corruption(
                "resurrection target slot is too small".into(),
            ));
        }
        self.flags &= !FLAG_DELETED;
        if is_directory {
            self.flags |= FLAG_DIRECTORY;
        } else {
            self.flags &= !FLAG_DIRECTORY;
        }
        self.target_node_address = target;
        self.name = name.to_string();
        Ok(())
    }

    /// Writes the entry at `address`. The first call freezes
    /// `entry_size_bytes`; later calls reuse it even if the name has since
    /// shrunk via resurrection.
    pub fn save(&mut self, disk: &DiskAccess, address: Address) -> Result<()> {
        if !self.frozen {
            self.entry_size_bytes = required_size(self.name_len_code_units());
            self.frozen = true;
        }
        self.self_address = Some(address);

        let mut off = address.as_u64();
        disk.write_byte(&mut off, self.flags)?;
        disk.write_u64(&mut off, self.target_node_address.as_u64())?;
        disk.write_u64(&mut off, self.next_entry_address.as_u64())?;
        let units: Vec<u16> = self.name.encode_utf16().collect();
        disk.write_byte(&mut off, units.len() as u8)?;
        let mut name_bytes = Vec::with_capacity(units.len() * 2);
        for unit in units {
            name_bytes.extend_from_slice(&unit.to_le_bytes());
        }
        disk.write_bytes(&mut off, &name_bytes)?;
        Ok(())
    }

    /// Loads the entry at `address`. `entry_size_bytes` is set to
    /// `required_size(name)` provisionally; `DirectoryNode::load` corrects
    /// it to the exact frozen size for every entry that has a successor in
    /// the same block.
    pub fn load(disk: &DiskAccess, address: Address) -> Result<Self> {
        let mut off = address.as_u64();
        let flags = disk.read_byte(&mut off)?;
        let target_node_address = Address(disk.read_u64(&mut off)?);
        let next_entry_address = Address(disk.read_u64(&mut off)?);
        let name_length = disk.read_byte(&mut off)? as usize;
        let raw = disk.read_bytes(&mut off, name_length * 2)?;
        if raw.len() != name_length * 2 {
            return Err(Error::Corruption("short read loading directory entry".into()));
        }
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let name = String::from_utf16(&units)
            .map_err(|_| Error::Corruption("invalid UTF-16 in directory entry name".into()))?;
        Ok(Self {
            flags,
            target_node_address,
            next_entry_address,
            entry_size_bytes: required_size(name_length),
            name,
            self_address: Some(address),
            frozen: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_size_rounds_up_to_four_bytes() {
        // header=18, name of 1 unit -> 20, already aligned.
        assert_eq!(required_size(1), 20);
        // name of 2 units -> 22, rounds to 24.
        assert_eq!(required_size(2), 24);
    }

    #[test]
    fn resurrection_requires_deleted_and_sufficient_slot() {
        let mut entry = DirectoryEntry::new("averylongname", false, Address(4096)).unwrap();
        entry.entry_size_bytes = 64;
        entry.frozen = true;
        assert!(entry.resurrect("ab", false, Address(8192)).is_err());
        entry.mark_deleted();
        assert!(entry.resurrect("ab", true, Address(8192)).is_ok());
        assert_eq!(entry.name, "ab");
        assert!(entry.is_directory());
        assert!(!entry.is_deleted());
        assert_eq!(entry.entry_size_bytes, 64);
    }

    #[test]
    fn rejects_names_outside_length_bounds() {
        assert!(DirectoryEntry::new("", false, Address(0)).is_err());
        let long_name: String = std::iter::repeat('a').take(256).collect();
        assert!(DirectoryEntry::new(&long_name, false, Address(0)).is_err());
    }
}
