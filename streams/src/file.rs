// File-backed stream with a cached length and explicit cursor

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use strata_core::{
    absolute_position, Extent, Extents, Result, SparseStream, StrataError, StreamId,
};

/// Stream over a disk image file.
///
/// The whole file is reported as a single extent; sparse-file hole probing is
/// left to the OS. Length is cached at open and maintained across writes and
/// truncation.
pub struct FileStream {
    file: File,
    length: u64,
    writable: bool,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl FileStream {
    /// Open an existing file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, false)
    }

    /// Open an existing file for reading and writing.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, true)
    }

    /// Create (or truncate) a file of `length` zero bytes.
    pub fn create<P: AsRef<Path>>(path: P, length: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(length)?;
        Self::from_file(file, true)
    }

    fn from_file(file: File, writable: bool) -> Result<Self> {
        let length = file.metadata()?.len();
        Ok(Self {
            file,
            length,
            writable,
            position: 0,
            disposed: false,
            id: StreamId::next(),
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(StrataError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl SparseStream for FileStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        self.writable
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn len(&self) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.length)
    }

    fn set_len(&mut self, value: u64) -> Result<()> {
        self.ensure_live()?;
        if !self.writable {
            return Err(StrataError::InvalidArgument(
                "attempt to resize a read-only stream".into(),
            ));
        }
        self.file.set_len(value)?;
        self.length = value;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let absolute = absolute_position(target, self.position, self.length)?;
        self.position = absolute;
        Ok(absolute)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        if self.position >= self.length {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(self.position))?;
        let mut total = 0;
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        self.position += total as u64;
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if !self.writable {
            return Err(StrataError::InvalidArgument(
                "attempt to write to a read-only stream".into(),
            ));
        }
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.write_all(buf)?;
        self.position += buf.len() as u64;
        self.length = self.length.max(self.position);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        let full = Extent::new(0, self.length);
        Ok(Extents::new(
            std::iter::once(full).filter(|e| !e.is_empty()),
        ))
    }

    fn dispose(&mut self) {
        // The handle itself closes when the stream is dropped.
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
