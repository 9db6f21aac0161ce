//! Mounting a volume from a file that itself lives inside another mounted
//! volume, so a virtual disk can be nested arbitrarily deep.

use std::io;
use std::sync::Mutex;

use crate::disk_access::BackingStore;
use crate::error::Error;
use crate::facade::{FileHandle, SeekFrom};

fn to_io_error(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// A [`BackingStore`] backed by an open file handle on another, already
/// mounted volume. `FileHandle` is not internally synchronised (its cursor
/// is owned by one caller by design), so positional access here is
/// serialised through a mutex the same way `DiskAccess` serialises access
/// to a host file.
pub struct NestedStore {
    handle: Mutex<FileHandle>,
}

impl NestedStore {
    pub fn new(handle: FileHandle) -> Self {
        Self {
            handle: Mutex::new(handle),
        }
    }
}

impl BackingStore for NestedStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut handle = self.handle.lock().unwrap();
        handle.set_position(SeekFrom::Start(offset)).map_err(to_io_error)?;
        handle.read(buf).map_err(to_io_error)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut handle = self.handle.lock().unwrap();
        handle.set_position(SeekFrom::Start(offset)).map_err(to_io_error)?;
        handle.write(buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn len(&self) -> io::Result<u64> {
        let handle = self.handle.lock().unwrap();
        handle.size().map_err(to_io_error)
    }
}
