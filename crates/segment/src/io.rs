/// File handle backends used by [`Segment`](crate::Segment).
///
/// `FileIo` is the normal read/append handle. `MmapIo` maps the file
/// read-only and is only used to speed up the startup scan; it refuses writes.
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Which backend a segment reads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// Plain file, positional reads and appends.
    File,
    /// Read-only memory map.
    Mmap,
}

/// Minimal file interface a segment needs.
///
/// Closing happens on `Drop`.
pub trait IoManager: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes read, which is smaller than requested only at end of file.
    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Appends `buf` to the end of the file.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flushes written data to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// Current file length in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Cuts the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// Opens `path` with the requested backend, creating the file if needed.
pub fn open_io(path: &Path, kind: IoKind) -> io::Result<Box<dyn IoManager>> {
    Ok(match kind {
        IoKind::File => Box::new(FileIo::open(path)?),
        IoKind::Mmap => Box::new(MmapIo::open(path)?),
    })
}

/// Append-mode file with seek-and-read positional reads.
pub struct FileIo {
    file: Mutex<File>,
}

impl FileIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // append mode: the write lands at the end regardless of the read cursor
        let file = self.file.get_mut();
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.get_mut().set_len(len)
    }
}

/// Read-only memory map of a segment file.
///
/// An empty file is represented without a mapping.
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Maps `path` read-only, creating an empty file if it does not exist.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the map is only held while the engine replays segments
            // at startup; nothing appends to or truncates the file meanwhile.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

fn read_only() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "memory-mapped segment is read-only",
    )
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.bytes();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.bytes().len() as u64)
    }

    fn truncate(&mut self, _len: u64) -> io::Result<()> {
        Err(read_only())
    }
}
