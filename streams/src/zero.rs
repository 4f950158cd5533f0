// Fixed-length stream of implicit zeroes

use std::io::SeekFrom;

use strata_core::{absolute_position, Extents, Result, SparseStream, StrataError, StreamId};

/// A read-only stream that is all hole: no extents, every read zero-filled.
/// Stands in for unreadable or intentionally blank regions of a composed
/// address space.
pub struct ZeroStream {
    length: u64,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl ZeroStream {
    pub fn new(length: u64) -> Self {
        Self {
            length,
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

impl SparseStream for ZeroStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn len(&self) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.length)
    }

    fn set_len(&mut self, _value: u64) -> Result<()> {
        self.ensure_live()?;
        Err(StrataError::InvalidArgument(
            "cannot change the length of a zero stream".into(),
        ))
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
        let count = buf.len().min((self.length - self.position) as usize);
        buf[..count].fill(0);
        self.position += count as u64;
        Ok(count)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        Err(StrataError::InvalidArgument(
            "attempt to write to a read-only stream".into(),
        ))
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        Ok(Extents::empty())
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
