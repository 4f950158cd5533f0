// Resizable in-memory sparse stream

use std::io::SeekFrom;

use strata_core::extent;
use strata_core::{
    absolute_position, Extent, Extents, Result, SparseStream, StrataError, StreamId,
};

/// In-memory stream that tracks which ranges have been explicitly written.
///
/// Reads in unwritten ranges return zeroes and the written ranges are
/// reported as extents. A zero-length writable instance makes a growable
/// tail for a concat stream.
pub struct MemStream {
    data: Vec<u8>,
    extents: Vec<Extent>,
    writable: bool,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl MemStream {
    /// Empty, writable stream.
    pub fn new() -> Self {
        Self::with_parts(Vec::new(), Vec::new(), true)
    }

    /// Writable stream of `length` zero bytes with no recorded extents.
    pub fn with_len(length: u64) -> Self {
        Self::with_parts(vec![0; length as usize], Vec::new(), true)
    }

    /// Writable stream seeded with `data`, recorded as one full extent.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let full = Extent::new(0, data.len() as u64);
        Self::with_parts(data, vec![full], true)
    }

    /// Read-only stream over `data`.
    pub fn read_only(data: Vec<u8>) -> Self {
        let full = Extent::new(0, data.len() as u64);
        Self::with_parts(data, vec![full], false)
    }

    fn with_parts(data: Vec<u8>, extents: Vec<Extent>, writable: bool) -> Self {
        Self {
            data,
            extents: extent::normalize(extents),
            writable,
            position: 0,
            disposed: false,
            id: StreamId::next(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(StrataError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemStream {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseStream for MemStream {
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
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, value: u64) -> Result<()> {
        self.ensure_live()?;
        if !self.writable {
            return Err(StrataError::InvalidArgument(
                "attempt to resize a read-only stream".into(),
            ));
        }
        self.data.resize(value as usize, 0);
        self.extents = extent::intersect(&self.extents, &[Extent::new(0, value)]);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let absolute = absolute_position(target, self.position, self.data.len() as u64)?;
        self.position = absolute;
        Ok(absolute)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        let length = self.data.len() as u64;
        if self.position >= length {
            return Ok(0);
        }
        let count = buf.len().min((length - self.position) as usize);
        let offset = self.position as usize;
        buf[..count].copy_from_slice(&self.data[offset..offset + count]);
        self.position += count as u64;
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if !self.writable {
            return Err(StrataError::InvalidArgument(
                "attempt to write to a read-only stream".into(),
            ));
        }
        let offset = self.position as usize;
        let end = offset + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        self.extents = extent::union(
            &self.extents,
            &[Extent::new(self.position, buf.len() as u64)],
        );
        self.position = end as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        Ok(Extents::new(self.extents.iter().copied()))
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
