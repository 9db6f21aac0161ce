//! The public surface: a mounted volume, path-based operations on it, and
//! open file handles.
//!
//! Path walks release each directory's lock as soon as the next segment's
//! address has been read rather than holding every ancestor locked for the
//! whole operation (hand-over-hand, not a held stack) — holding N ancestors'
//! locks for a multi-step move or copy risks exactly the pile-up the 1 s
//! timeout exists to fail fast out of.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::{Address, COPY_BUFFER_SIZE};
use crate::disk_access::DiskAccess;
use crate::error::{Error, Result};
use crate::master_record::{MasterRecord, NodeObject};
use crate::node;
use crate::path::PathName;
use crate::pattern::SearchPattern;

/// A snapshot of a node's metadata, as returned by directory listings and
/// `get_file_info`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    /// Absolute path, as `FindFile` would combine `parent \ name`.
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub created_ticks: i64,
    pub modified_ticks: i64,
}

/// Where a `FileHandle::set_position` seek is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(u64),
}

/// A mounted volume.
pub struct VfsFacade {
    master: Arc<MasterRecord>,
}

impl VfsFacade {
    pub fn format(disk: DiskAccess, total_bytes: u64) -> Result<Self> {
        Ok(Self {
            master: Arc::new(MasterRecord::format(disk, total_bytes)?),
        })
    }

    pub fn mount(disk: DiskAccess) -> Result<Self> {
        Ok(Self {
            master: Arc::new(MasterRecord::mount(disk)?),
        })
    }

    /// Flushes pending directory compaction and drops the live-node cache.
    pub fn dispose(&self) -> Result<()> {
        self.master.dispose()
    }

    fn node_at(&self, addr: Address) -> Result<Arc<RwLock<NodeObject>>> {
        self.master.get_node(addr)
    }

    /// Walks from the root to `path`, returning the target node's shared
    /// handle.
    fn find_node(&self, path: &PathName) -> Result<Arc<RwLock<NodeObject>>> {
        let mut current = self.node_at(self.master.root_address())?;
        for seg in path.segments() {
            let next_addr = {
                let guard = node::read_timed(&current)?;
                let dir = guard.as_directory()?;
                let entry = dir
                    .find_child_entry(seg)
                    .ok_or_else(|| Error::NotFound(seg.clone()))?;
                entry.target_node_address
            };
            current = self.node_at(next_addr)?;
        }
        Ok(current)
    }

    /// Resolves `path`'s parent directory and returns it alongside the
    /// final segment name. Errors on the root, which has no parent.
    fn resolve_parent(&self, path: &PathName) -> Result<(Arc<RwLock<NodeObject>>, String)> {
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidPath("the root has no parent".into()))?
            .to_string();
        let parent = self.find_node(&path.parent())?;
        Ok((parent, name))
    }

    pub fn create_directory(&self, path: &PathName) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let parent_addr = { node::read_timed(&parent)?.header_address() };
        let new_addr = self.master.create_directory_node(parent_addr)?;
        let mut guard = node::write_timed(&parent)?;
        if let Err(e) = guard.as_directory_mut()?.add_child_entry(
            self.master.disk(),
            self.master.as_ref(),
            &name,
            true,
            new_addr,
        ) {
            drop(guard);
            let _ = self.master.free_node_and_all_allocated_blocks(new_addr);
            return Err(e);
        }
        Ok(())
    }

    /// Creates a new, empty file and returns it already open for writing;
    /// the caller owns the handle and must close it to release the lock.
    pub fn create_file(&self, path: &PathName) -> Result<FileHandle> {
        let (parent, name) = self.resolve_parent(path)?;
        let new_addr = self.master.create_file_node()?;
        let mut guard = node::write_timed(&parent)?;
        if let Err(e) = guard.as_directory_mut()?.add_child_entry(
            self.master.disk(),
            self.master.as_ref(),
            &name,
            false,
            new_addr,
        ) {
            drop(guard);
            let _ = self.master.free_node_and_all_allocated_blocks(new_addr);
            return Err(e);
        }
        drop(guard);
        let node = self.node_at(new_addr)?;
        FileHandle::from_write(self.master.clone(), &node)
    }

    /// Opens an existing file for positional read (`write = false`) or
    /// read/write (`write = true`), holding the corresponding node lock for
    /// the handle's whole lifetime until `close`.
    pub fn open_file(&self, path: &PathName, write: bool) -> Result<FileHandle> {
        let node = self.find_node(path)?;
        if write {
            FileHandle::from_write(self.master.clone(), &node)
        } else {
            FileHandle::from_read(self.master.clone(), &node)
        }
    }

    pub fn delete_file(&self, path: &PathName) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let target = {
            let mut guard = node::write_timed(&parent)?;
            let dir = guard.as_directory_mut()?;
            let entry = dir
                .find_child_entry(&name)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            if entry.is_directory() {
                return Err(Error::WrongKind(format!("{name} is a directory")));
            }
            dir.find_and_remove_child_entry(self.master.disk(), &name)?
                .target_node_address
        };
        self.master.free_node_and_all_allocated_blocks(target)
    }

    /// Deletes the directory at `path`. A non-empty directory is refused
    /// unless `recursive` is set, in which case every descendant is torn
    /// down post-order (children freed before their parent) before the
    /// directory's own entry and node slot are released.
    pub fn delete_directory(&self, path: &PathName, recursive: bool) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let target = {
            let guard = node::read_timed(&parent)?;
            let dir = guard.as_directory()?;
            let entry = dir
                .find_child_entry(&name)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            if !entry.is_directory() {
                return Err(Error::WrongKind(format!("{name} is a file")));
            }
            entry.target_node_address
        };
        if !recursive {
            let child = self.node_at(target)?;
            let child_guard = node::read_timed(&child)?;
            if !child_guard.as_directory()?.is_empty() {
                return Err(Error::InvalidPath(format!("{name} is not empty")));
            }
        }
        let mut guard = node::write_timed(&parent)?;
        guard
            .as_directory_mut()?
            .find_and_remove_child_entry(self.master.disk(), &name)?;
        drop(guard);
        if recursive {
            self.free_directory_tree(target)
        } else {
            self.master.free_node_and_all_allocated_blocks(target)
        }
    }

    /// Write-locks and frees every descendant of the directory at `addr`
    /// post-order, then frees `addr` itself. `addr` must already be
    /// detached from its parent.
    fn free_directory_tree(&self, addr: Address) -> Result<()> {
        let children: Vec<(Address, bool)> = {
            let node = self.node_at(addr)?;
            let guard = node::read_timed(&node)?;
            guard
                .as_directory()?
                .all_child_entries()
                .map(|e| (e.target_node_address, e.is_directory()))
                .collect()
        };
        for (child_addr, is_directory) in children {
            if is_directory {
                self.free_directory_tree(child_addr)?;
            } else {
                self.master.free_node_and_all_allocated_blocks(child_addr)?;
            }
        }
        self.master.free_node_and_all_allocated_blocks(addr)
    }

    fn is_strict_prefix(prefix: &PathName, of: &PathName) -> bool {
        let p = prefix.segments();
        let o = of.segments();
        p.len() < o.len() && p.iter().zip(o.iter()).all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Detaches the entry at `src` and reattaches it at `dst` without
    /// touching its target node, preserving its data and children.
    fn relink(&self, src: &PathName, dst: &PathName, expect_directory: bool) -> Result<()> {
        if Self::is_strict_prefix(src, dst) {
            return Err(Error::InvalidPath(
                "cannot move a directory into its own subtree".into(),
            ));
        }
        let (src_parent, src_name) = self.resolve_parent(src)?;
        let (dst_parent, dst_name) = self.resolve_parent(dst)?;

        let (target, is_directory) = {
            let guard = node::read_timed(&src_parent)?;
            let entry = guard
                .as_directory()?
                .find_child_entry(&src_name)
                .ok_or_else(|| Error::NotFound(src_name.clone()))?;
            (entry.target_node_address, entry.is_directory())
        };
        if is_directory != expect_directory {
            return Err(Error::WrongKind(src_name));
        }

        {
            let mut guard = node::write_timed(&dst_parent)?;
            guard.as_directory_mut()?.add_child_entry(
                self.master.disk(),
                self.master.as_ref(),
                &dst_name,
                is_directory,
                target,
            )?;
        }
        let mut guard = node::write_timed(&src_parent)?;
        guard
            .as_directory_mut()?
            .find_and_remove_child_entry(self.master.disk(), &src_name)?;
        Ok(())
    }

    pub fn move_file(&self, src: &PathName, dst: &PathName) -> Result<()> {
        self.relink(src, dst, false)
    }

    pub fn move_directory(&self, src: &PathName, dst: &PathName) -> Result<()> {
        self.relink(src, dst, true)
    }

    /// Estimates how many blocks and nodes a recursive copy of `src` would
    /// consume, without mutating anything.
    fn estimate_copy_cost(&self, node: &Arc<RwLock<NodeObject>>) -> Result<(u64, u64)> {
        let guard = node::read_timed(node)?;
        match &*guard {
            NodeObject::File(f) => {
                let blocks = f.core.blocks.num_blocks_allocated;
                Ok((blocks, 1))
            }
            NodeObject::Directory(d) => {
                let mut blocks = d.core.blocks.num_blocks_allocated;
                let mut nodes = 1u64;
                let children: Vec<Address> = d
                    .all_child_entries()
                    .map(|e| e.target_node_address)
                    .collect();
                drop(guard);
                for child in children {
                    let child_node = self.node_at(child)?;
                    let (b, n) = self.estimate_copy_cost(&child_node)?;
                    blocks += b;
                    nodes += n;
                }
                Ok((blocks, nodes))
            }
        }
    }

    /// Dry-run preflight for a bulk copy: rejects a destination-name
    /// collision and insufficient free space up front. Does not reserve
    /// anything, so a concurrent allocation can still exhaust space between
    /// this check and the real copy; the copy itself still fails cleanly if
    /// that happens, this only avoids starting work that is obviously
    /// doomed.
    fn preflight_copy(&self, src: &PathName, dst: &PathName) -> Result<()> {
        if self.find_node(dst).is_ok() {
            return Err(Error::AlreadyExists(dst.full_path()));
        }
        let src_node = self.find_node(src)?;
        let (blocks_needed, nodes_needed) = self.estimate_copy_cost(&src_node)?;
        if self.master.free_blocks_total() < blocks_needed
            || self.master.free_nodes_total() < nodes_needed
        {
            return Err(Error::DiskFull);
        }
        Ok(())
    }

    pub fn copy_file(&self, src: &PathName, dst: &PathName) -> Result<()> {
        self.preflight_copy(src, dst)?;
        let mut reader = self.open_file(src, false)?;
        let mut writer = self.create_file(dst)?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
        }
        Ok(())
    }

    pub fn copy_directory(&self, src: &PathName, dst: &PathName) -> Result<()> {
        self.preflight_copy(src, dst)?;
        self.copy_directory_inner(src, dst)
    }

    fn copy_directory_inner(&self, src: &PathName, dst: &PathName) -> Result<()> {
        self.create_directory(dst)?;
        let src_node = self.find_node(src)?;
        let children: Vec<(String, bool)> = {
            let guard = node::read_timed(&src_node)?;
            guard
                .as_directory()?
                .all_child_entries()
                .map(|e| (e.name.clone(), e.is_directory()))
                .collect()
        };
        for (name, is_dir) in children {
            let child_src = src.child(&name)?;
            let child_dst = dst.child(&name)?;
            if is_dir {
                self.copy_directory_inner(&child_src, &child_dst)?;
            } else {
                self.copy_file_inner(&child_src, &child_dst)?;
            }
        }
        Ok(())
    }

    fn copy_file_inner(&self, src: &PathName, dst: &PathName) -> Result<()> {
        let mut reader = self.open_file(src, false)?;
        let mut writer = self.create_file(dst)?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
        }
        Ok(())
    }

    /// Lists entries of the directory at `dir_path` whose name matches
    /// `pattern`. When `recursive`, also descends into every child
    /// directory (matched or not) and reports matches found below it,
    /// snapshotting each directory's contents under its own read lock before
    /// releasing it and moving on, so the result stays safe to consume after
    /// every lock involved has been dropped.
    pub fn find_file(
        &self,
        dir_path: &PathName,
        pattern: &SearchPattern,
        recursive: bool,
    ) -> Result<Vec<FileInfo>> {
        let mut out = Vec::new();
        self.find_file_into(dir_path, pattern, recursive, &mut out)?;
        Ok(out)
    }

    fn find_file_into(
        &self,
        dir_path: &PathName,
        pattern: &SearchPattern,
        recursive: bool,
        out: &mut Vec<FileInfo>,
    ) -> Result<()> {
        let dir_node = self.find_node(dir_path)?;
        let (matches, subdirs): (Vec<(String, bool, Address)>, Vec<String>) = {
            let guard = node::read_timed(&dir_node)?;
            let dir = guard.as_directory()?;
            let matches = dir
                .find_matching_entries(pattern)
                .into_iter()
                .map(|e| (e.name.clone(), e.is_directory(), e.target_node_address))
                .collect();
            let subdirs = dir
                .all_child_entries()
                .filter(|e| e.is_directory())
                .map(|e| e.name.clone())
                .collect();
            (matches, subdirs)
        };
        for (name, is_directory, addr) in matches {
            let (size, created_ticks, modified_ticks) = self.peek_metadata(addr)?;
            out.push(FileInfo {
                path: dir_path.child(&name)?.full_path(),
                name,
                is_directory,
                size,
                created_ticks,
                modified_ticks,
            });
        }
        if recursive {
            for name in subdirs {
                let child_path = dir_path.child(&name)?;
                if self.find_file_into(&child_path, pattern, true, out).is_err() {
                    // Skip subtrees that became unreadable (e.g. a lock
                    // timeout mid-walk); the rest of the enumeration
                    // continues.
                    continue;
                }
            }
        }
        Ok(())
    }

    fn peek_metadata(&self, addr: Address) -> Result<(u64, i64, i64)> {
        let node = self.node_at(addr)?;
        let guard = node::read_timed(&node)?;
        let core = match &*guard {
            NodeObject::Directory(d) => &d.core,
            NodeObject::File(f) => &f.core,
        };
        Ok((core.size, core.created_ticks, core.modified_ticks))
    }

    pub fn get_file_info(&self, path: &PathName) -> Result<FileInfo> {
        let node = self.find_node(path)?;
        let guard = node::read_timed(&node)?;
        let (is_directory, core) = match &*guard {
            NodeObject::Directory(d) => (true, &d.core),
            NodeObject::File(f) => (false, &f.core),
        };
        Ok(FileInfo {
            name: path.name().unwrap_or("").to_string(),
            path: path.full_path(),
            is_directory,
            size: core.size,
            created_ticks: core.created_ticks,
            modified_ticks: core.modified_ticks,
        })
    }

    /// The set of roots this facade exposes. A single mounted volume always
    /// has exactly one, `\`, matching §6's `GetDrives() → {"\\"}` — there is
    /// no multi-volume namespace to enumerate here, unlike a host OS driver
    /// letter table.
    pub fn get_drives(&self) -> Vec<PathName> {
        vec![PathName::root()]
    }
}

/// The lock a `FileHandle` holds on its node for its whole lifetime: either
/// a read guard (`OpenFile(path, write=false)`) or a write guard
/// (`CreateFile`/`OpenFile(path, write=true)`). Held from open to `close`,
/// matching §5's "a file opened via OpenFile/CreateFile holds its node's
/// reader or writer lock until Close" — unlike the source's IDisposable
/// pattern, an un-closed handle here still releases its lock deterministically
/// when dropped, since `parking_lot`'s guards are RAII.
enum FileLock {
    Read(node::ReadGuard<NodeObject>),
    Write(node::WriteGuard<NodeObject>),
}

impl FileLock {
    fn object(&self) -> &NodeObject {
        match self {
            FileLock::Read(g) => g,
            FileLock::Write(g) => g,
        }
    }

    fn core(&self) -> &crate::node::NodeCore {
        match self.object() {
            NodeObject::File(f) => &f.core,
            NodeObject::Directory(_) => unreachable!("FileHandle only ever wraps a file node"),
        }
    }
}

/// A handle to an open file: the node lock it holds for its lifetime, plus
/// its own read/write cursor (never shared with other handles on the same
/// file, even two handles open on the same node).
pub struct FileHandle {
    master: Arc<MasterRecord>,
    lock: Option<FileLock>,
    position: u64,
}

impl FileHandle {
    fn from_read(master: Arc<MasterRecord>, node: &Arc<RwLock<NodeObject>>) -> Result<Self> {
        let guard = node::read_timed(node)?;
        guard.as_file()?;
        Ok(Self {
            master,
            lock: Some(FileLock::Read(guard)),
            position: 0,
        })
    }

    fn from_write(master: Arc<MasterRecord>, node: &Arc<RwLock<NodeObject>>) -> Result<Self> {
        let guard = node::write_timed(node)?;
        guard.as_file()?;
        Ok(Self {
            master,
            lock: Some(FileLock::Write(guard)),
            position: 0,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether this handle was opened for writing.
    pub fn can_write(&self) -> bool {
        matches!(self.lock, Some(FileLock::Write(_)))
    }

    fn lock(&self) -> Result<&FileLock> {
        self.lock.as_ref().ok_or(Error::Closed)
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.lock()?.core().size)
    }

    pub fn creation_time(&self) -> Result<i64> {
        Ok(self.lock()?.core().created_ticks)
    }

    pub fn last_modification_time(&self) -> Result<i64> {
        Ok(self.lock()?.core().modified_ticks)
    }

    /// Moves the cursor relative to the start, the current position, or the
    /// end of the file, always clamped to `[0, size]`. The `End` case is the
    /// corrected, non-off-by-one semantics documented in `SPEC_FULL.md` §C.2
    /// (`file_size.saturating_sub(n)`, not the source's `file_size - n - 1`).
    /// Returns the resulting absolute position.
    pub fn set_position(&mut self, seek: SeekFrom) -> Result<u64> {
        let size = self.size()?;
        self.position = match seek {
            SeekFrom::Start(n) => n.min(size),
            SeekFrom::End(n) => size.saturating_sub(n).min(size),
            SeekFrom::Current(delta) => {
                if delta >= 0 {
                    self.position.saturating_add(delta as u64).min(size)
                } else {
                    self.position.saturating_sub(delta.unsigned_abs())
                }
            }
        };
        Ok(self.position)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let master = self.master.clone();
        let position = self.position;
        let n = match self.lock()?.object() {
            NodeObject::File(f) => f.read_data(master.disk(), master.as_ref(), position, buf)?,
            NodeObject::Directory(_) => unreachable!("FileHandle only ever wraps a file node"),
        };
        self.position += n as u64;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let position = self.position;
        let master = self.master.clone();
        match self.lock.as_mut().ok_or(Error::Closed)? {
            FileLock::Write(g) => match &mut *g {
                NodeObject::File(f) => f.write_data(master.disk(), master.as_ref(), position, buf)?,
                NodeObject::Directory(_) => unreachable!("FileHandle only ever wraps a file node"),
            },
            FileLock::Read(_) => {
                return Err(Error::WrongKind("file handle opened for reading".into()))
            }
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        let master = self.master.clone();
        match self.lock.as_mut().ok_or(Error::Closed)? {
            FileLock::Write(g) => match &mut *g {
                NodeObject::File(f) => f.set_file_size(master.disk(), master.as_ref(), len)?,
                NodeObject::Directory(_) => unreachable!("FileHandle only ever wraps a file node"),
            },
            FileLock::Read(_) => {
                return Err(Error::WrongKind("file handle opened for reading".into()))
            }
        }
        self.position = self.position.min(len);
        Ok(())
    }

    /// Releases the held node lock. Idempotent: a second call is a no-op.
    pub fn close(&mut self) {
        self.lock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_access::FileStore;

    fn mounted(mb: u64) -> VfsFacade {
        let file = tempfile::tempfile().unwrap();
        file.set_len(mb * 1024 * 1024).unwrap();
        let disk = DiskAccess::new(Box::new(FileStore::new(file)));
        VfsFacade::format(disk, mb * 1024 * 1024).unwrap()
    }

    #[test]
    fn create_and_open_a_file_round_trips_data() {
        let vfs = mounted(4);
        let path = PathName::parse(r"\hello.txt").unwrap();
        vfs.create_file(&path).unwrap();
        let mut handle = vfs.open_file(&path, true).unwrap();
        handle.write(b"hello").unwrap();
        handle.set_position(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 5];
        let n = handle.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn create_directory_and_nested_file() {
        let vfs = mounted(4);
        let dir = PathName::parse(r"\docs").unwrap();
        vfs.create_directory(&dir).unwrap();
        let file = PathName::parse(r"\docs\readme.txt").unwrap();
        vfs.create_file(&file).unwrap();
        let info = vfs.get_file_info(&file).unwrap();
        assert!(!info.is_directory);
    }

    #[test]
    fn delete_directory_refuses_when_not_empty() {
        let vfs = mounted(4);
        let dir = PathName::parse(r"\docs").unwrap();
        vfs.create_directory(&dir).unwrap();
        vfs.create_file(&PathName::parse(r"\docs\a.txt").unwrap()).unwrap();
        assert!(vfs.delete_directory(&dir, false).is_err());
    }

    #[test]
    fn delete_directory_recursive_tears_down_the_whole_subtree() {
        let vfs = mounted(4);
        let dir = PathName::parse(r"\docs").unwrap();
        vfs.create_directory(&dir).unwrap();
        vfs.create_file(&PathName::parse(r"\docs\a.txt").unwrap()).unwrap();
        let nested = PathName::parse(r"\docs\nested").unwrap();
        vfs.create_directory(&nested).unwrap();
        vfs.create_file(&PathName::parse(r"\docs\nested\b.txt").unwrap())
            .unwrap();

        vfs.delete_directory(&dir, true).unwrap();

        assert!(vfs.get_file_info(&dir).is_err());
        let pattern = SearchPattern::compile("*").unwrap();
        let listing = vfs.find_file(&PathName::root(), &pattern, false).unwrap();
        assert!(listing.is_empty());
    }

    #[test]
    fn move_file_preserves_its_data() {
        let vfs = mounted(4);
        let src = PathName::parse(r"\a.txt").unwrap();
        vfs.create_file(&src).unwrap();
        let mut handle = vfs.open_file(&src, true).unwrap();
        handle.write(b"payload").unwrap();
        handle.close();

        let dst = PathName::parse(r"\b.txt").unwrap();
        vfs.move_file(&src, &dst).unwrap();
        assert!(vfs.get_file_info(&src).is_err());

        let mut handle = vfs.open_file(&dst, false).unwrap();
        let mut buf = [0u8; 7];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn copy_directory_duplicates_structure_and_contents() {
        let vfs = mounted(4);
        let src = PathName::parse(r"\src").unwrap();
        vfs.create_directory(&src).unwrap();
        let file = PathName::parse(r"\src\a.txt").unwrap();
        let mut created = vfs.create_file(&file).unwrap();
        created.write(b"data").unwrap();
        created.close();

        let dst = PathName::parse(r"\dst").unwrap();
        vfs.copy_directory(&src, &dst).unwrap();

        let mut handle = vfs
            .open_file(&PathName::parse(r"\dst\a.txt").unwrap(), false)
            .unwrap();
        let mut buf = [0u8; 4];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"data");
        // Original is untouched.
        assert!(vfs.get_file_info(&file).is_ok());
    }

    #[test]
    fn find_file_matches_wildcard_pattern() {
        let vfs = mounted(4);
        vfs.create_file(&PathName::parse(r"\a.txt").unwrap()).unwrap();
        vfs.create_file(&PathName::parse(r"\b.txt").unwrap()).unwrap();
        vfs.create_file(&PathName::parse(r"\c.bin").unwrap()).unwrap();
        let pattern = SearchPattern::compile("*.txt").unwrap();
        let results = vfs.find_file(&PathName::root(), &pattern, false).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn find_file_recurses_into_subdirectories() {
        let vfs = mounted(4);
        vfs.create_directory(&PathName::parse(r"\docs").unwrap()).unwrap();
        vfs.create_file(&PathName::parse(r"\docs\a.txt").unwrap()).unwrap();
        vfs.create_file(&PathName::parse(r"\b.txt").unwrap()).unwrap();
        vfs.create_file(&PathName::parse(r"\c.bin").unwrap()).unwrap();

        let pattern = SearchPattern::compile("*.txt").unwrap();
        let shallow = vfs.find_file(&PathName::root(), &pattern, false).unwrap();
        assert_eq!(shallow.len(), 1);

        let deep = vfs.find_file(&PathName::root(), &pattern, true).unwrap();
        let mut paths: Vec<_> = deep.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec![r"\b.txt".to_string(), r"\docs\a.txt".to_string()]);
    }

    #[test]
    fn moving_a_directory_into_its_own_subtree_is_rejected() {
        let vfs = mounted(4);
        let a = PathName::parse(r"\a").unwrap();
        vfs.create_directory(&a).unwrap();
        let b = PathName::parse(r"\a\b").unwrap();
        assert!(vfs.move_directory(&a, &b).is_err());
    }
}
