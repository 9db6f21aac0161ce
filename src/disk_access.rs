//! Thread-safe, stateless positional access to a byte-addressable backing
//! store, and the two concrete surfaces the engine mounts onto: a host OS
//! file, and a file node of another, already-mounted volume.

use std::io;
use std::sync::Mutex as StdMutex;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// A byte-addressable random-access surface. All methods are positional —
/// they never depend on or mutate an internal cursor — so a single
/// implementation can be shared across threads without synchronising
/// callers' access patterns.
pub trait BackingStore: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// actually transferred (short only at end of store).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` starting at `offset`, extending the store if it allows
    /// growth. Returns the number of bytes actually transferred.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Current size of the store in bytes.
    fn len(&self) -> io::Result<u64>;
}

/// A regular host file used as the backing store for a top-level mount.
pub struct FileStore {
    file: std::fs::File,
}

impl FileStore {
    pub fn new(file: std::fs::File) -> Self {
        Self { file }
    }
}

#[cfg(unix)]
impl BackingStore for FileStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.write_at(buf, offset)?;
        Ok(buf.len())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(not(unix))]
impl BackingStore for FileStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        // Non-unix targets lack stateless pread/pwrite; serialise through a
        // mutex-guarded cursor instead. DiskAccess still only ever calls in
        // through its own lock, so this stays correct, just not lock-free.
        static GUARD: StdMutex<()> = StdMutex::new(());
        let _g = GUARD.lock().unwrap();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        use std::io::{Seek, SeekFrom, Write};
        static GUARD: StdMutex<()> = StdMutex::new(());
        let _g = GUARD.lock().unwrap();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Positional read/write interface over a backing store, serialising all
/// access on a single lock as §4.1 requires: no caching layer is assumed,
/// callers batch their own access.
pub struct DiskAccess {
    store: StdMutex<Box<dyn BackingStore>>,
}

impl DiskAccess {
    pub fn new(store: Box<dyn BackingStore>) -> Self {
        Self {
            store: StdMutex::new(store),
        }
    }

    /// Size of the backing store in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.store.lock().unwrap().len()?)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let store = self.store.lock().unwrap();
        let mut read = 0;
        while read < buf.len() {
            let n = store.read_at(offset + read as u64, &mut buf[read..])?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read against backing store",
                )));
            }
            read += n;
        }
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let store = self.store.lock().unwrap();
        let mut written = 0;
        while written < buf.len() {
            let n = store.write_at(offset + written as u64, &buf[written..])?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "backing store refused write",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Reads a single byte at `*offset`, advancing it by 1.
    pub fn read_byte(&self, offset: &mut u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact_at(*offset, &mut buf)?;
        *offset += 1;
        Ok(buf[0])
    }

    /// Writes a single byte at `*offset`, advancing it by 1.
    pub fn write_byte(&self, offset: &mut u64, value: u8) -> Result<()> {
        self.write_all_at(*offset, &[value])?;
        *offset += 1;
        Ok(())
    }

    /// Reads a little-endian `u32` at `*offset`, advancing it by 4.
    pub fn read_u32(&self, offset: &mut u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(*offset, &mut buf)?;
        *offset += 4;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Writes a little-endian `u32` at `*offset`, advancing it by 4.
    pub fn write_u32(&self, offset: &mut u64, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_all_at(*offset, &buf)?;
        *offset += 4;
        Ok(())
    }

    /// Reads a little-endian `u64` at `*offset`, advancing it by 8.
    pub fn read_u64(&self, offset: &mut u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(*offset, &mut buf)?;
        *offset += 8;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Writes a little-endian `u64` at `*offset`, advancing it by 8.
    pub fn write_u64(&self, offset: &mut u64, value: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_all_at(*offset, &buf)?;
        *offset += 8;
        Ok(())
    }

    /// Reads up to `count` bytes at `*offset`, advancing it by the number of
    /// bytes actually read. Short at end of store; never an error on its
    /// own.
    pub fn read_bytes(&self, offset: &mut u64, count: usize) -> Result<Vec<u8>> {
        let store = self.store.lock().unwrap();
        let mut buf = vec![0u8; count];
        let mut read = 0;
        while read < count {
            let n = store.read_at(*offset + read as u64, &mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        *offset += read as u64;
        Ok(buf)
    }

    /// Writes `buf` fully at `*offset`, advancing it by `buf.len()`.
    pub fn write_bytes(&self, offset: &mut u64, buf: &[u8]) -> Result<()> {
        self.write_all_at(*offset, buf)?;
        *offset += buf.len() as u64;
        Ok(())
    }
}
