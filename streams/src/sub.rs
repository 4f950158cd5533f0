// Windowed view over a byte range of a parent stream

use std::io::SeekFrom;

use strata_core::{
    absolute_position, Extent, Extents, Ownership, Result, SparseStream, StrataError, StreamId,
    StreamRef,
};

/// A sparse stream exposing the byte range `[first, first + count)` of a
/// parent stream. Reads clip at the window edge; writes must fit inside it.
/// The volume layer uses this to present partitions as flat streams.
pub struct SubStream {
    parent: StreamRef,
    ownership: Ownership,
    window: Extent,
    can_read: bool,
    can_write: bool,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl std::fmt::Debug for SubStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubStream")
            .field("ownership", &self.ownership)
            .field("window", &self.window)
            .field("can_read", &self.can_read)
            .field("can_write", &self.can_write)
            .field("position", &self.position)
            .field("disposed", &self.disposed)
            .field("id", &self.id)
            .finish()
    }
}

impl SubStream {
    pub fn new(parent: StreamRef, window: Extent) -> Result<Self> {
        Self::with_ownership(parent, Ownership::None, window)
    }

    pub fn with_ownership(parent: StreamRef, ownership: Ownership, window: Extent) -> Result<Self> {
        let (parent_len, can_read, can_write, can_seek) = {
            let p = parent.borrow();
            (p.len()?, p.can_read(), p.can_write(), p.can_seek())
        };
        if !can_seek {
            return Err(StrataError::InvalidArgument(
                "sub-stream parent must be seekable".into(),
            ));
        }
        if window.end() > parent_len {
            return Err(StrataError::InvalidArgument(format!(
                "sub-stream window {window} extends beyond the parent stream"
            )));
        }
        Ok(Self {
            parent,
            ownership,
            window,
            can_read,
            can_write,
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

impl SparseStream for SubStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn can_read(&self) -> bool {
        self.can_read
    }

    fn can_write(&self) -> bool {
        self.can_write
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn len(&self) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.window.length)
    }

    fn set_len(&mut self, _value: u64) -> Result<()> {
        self.ensure_live()?;
        Err(StrataError::InvalidArgument(
            "cannot change the length of a sub-stream".into(),
        ))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let absolute = absolute_position(target, self.position, self.window.length)?;
        self.position = absolute;
        Ok(absolute)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        if self.position >= self.window.length {
            return Ok(0);
        }
        let count = buf.len().min((self.window.length - self.position) as usize);
        let n = {
            let mut parent = self.parent.borrow_mut();
            parent.set_position(self.window.start + self.position)?;
            parent.read(&mut buf[..count])?
        };
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if !self.can_write {
            return Err(StrataError::InvalidArgument(
                "attempt to write to a read-only stream".into(),
            ));
        }
        if self.position + buf.len() as u64 > self.window.length {
            return Err(StrataError::InvalidArgument(
                "attempt to write beyond the end of a sub-stream".into(),
            ));
        }
        {
            let mut parent = self.parent.borrow_mut();
            parent.set_position(self.window.start + self.position)?;
            parent.write(buf)?;
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.parent.borrow_mut().flush()
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        let first = self.window.start;
        let clipped = self.parent.borrow().extents_in_range(self.window)?;
        Ok(Extents::new(
            clipped
                .into_iter()
                .map(move |e| Extent::new(e.start - first, e.length)),
        ))
    }

    fn position_in_base_stream(&self, base: &StreamRef, position: u64) -> Result<Option<u64>> {
        self.ensure_live()?;
        if base.borrow().stream_id() == self.id {
            return Ok(Some(position));
        }
        self.parent
            .borrow()
            .position_in_base_stream(base, self.window.start + position)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.ownership == Ownership::Dispose {
            self.parent.borrow_mut().dispose();
        }
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
