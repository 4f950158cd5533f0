// Concatenation of ordered sub-streams into one sparse address space

use std::io::SeekFrom;

use strata_core::{
    absolute_position, Extent, Extents, Ownership, Result, SparseStream, StrataError, StreamId,
    StreamRef,
};

/// A sparse stream that views an ordered list of component streams as a
/// single contiguous address space.
///
/// The virtual length is the sum of the component lengths and is recomputed
/// live, because the final component is allowed to grow: writes at or past
/// the end of the view attach to it, so appending a zero-length writable
/// tail makes the whole view appendable. Earlier components must keep their
/// length for the lifetime of the view, or the address space of everything
/// after them shifts.
///
/// The component list is fixed at construction. Capabilities are the
/// conjunction of the component capabilities, computed from the stored list.
pub struct ConcatStream {
    streams: Vec<StreamRef>,
    ownership: Ownership,
    can_read: bool,
    can_write: bool,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl std::fmt::Debug for ConcatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcatStream")
            .field("streams_len", &self.streams.len())
            .field("ownership", &self.ownership)
            .field("can_read", &self.can_read)
            .field("can_write", &self.can_write)
            .field("position", &self.position)
            .field("disposed", &self.disposed)
            .field("id", &self.id)
            .finish()
    }
}

impl ConcatStream {
    pub fn new(streams: Vec<StreamRef>, ownership: Ownership) -> Result<Self> {
        if streams.is_empty() {
            return Err(StrataError::InvalidArgument(
                "concat stream requires at least one component".into(),
            ));
        }
        let mut can_read = true;
        let mut can_write = true;
        for stream in &streams {
            let s = stream.borrow();
            if !s.can_seek() {
                return Err(StrataError::InvalidArgument(
                    "concat stream components must be seekable".into(),
                ));
            }
            can_read &= s.can_read();
            can_write &= s.can_write();
        }
        Ok(Self {
            streams,
            ownership,
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

    fn total_len(&self) -> Result<u64> {
        let mut total = 0;
        for stream in &self.streams {
            total += stream.borrow().len()?;
        }
        Ok(total)
    }

    /// Active component for `target` and the cumulative offset it starts at.
    ///
    /// The scan lands on the final component whenever `target` is at or past
    /// the end, so end-of-stream writes attach to the growable tail.
    fn select(&self, target: u64) -> Result<(usize, u64)> {
        let mut start = 0;
        for (index, stream) in self.streams.iter().enumerate() {
            let length = stream.borrow().len()?;
            if start + length > target || index == self.streams.len() - 1 {
                return Ok((index, start));
            }
            start += length;
        }
        unreachable!("component list is never empty")
    }
}

impl SparseStream for ConcatStream {
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
        self.total_len()
    }

    fn set_len(&mut self, value: u64) -> Result<()> {
        self.ensure_live()?;
        let length = self.total_len()?;
        let (index, start) = self.select(length)?;
        if value < start {
            return Err(StrataError::ShrinkBelow(start));
        }
        self.streams[index].borrow_mut().set_len(value - start)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let length = self.total_len()?;
        let absolute = absolute_position(target, self.position, length)?;
        // Past-the-end positions are legal; a later tail write extends.
        self.position = absolute;
        Ok(absolute)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        if !self.can_read {
            return Err(StrataError::InvalidArgument(
                "attempt to read from a write-only stream".into(),
            ));
        }
        let mut total = 0;
        while total < buf.len() {
            let (index, start) = self.select(self.position)?;
            let n = {
                let mut child = self.streams[index].borrow_mut();
                child.set_position(self.position - start)?;
                child.read(&mut buf[total..])?
            };
            if n == 0 {
                break;
            }
            total += n;
            self.position += n as u64;
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if !self.can_write {
            return Err(StrataError::InvalidArgument(
                "attempt to write to a read-only stream".into(),
            ));
        }
        let mut written = 0;
        while written < buf.len() {
            let (index, start) = self.select(self.position)?;
            let in_stream = self.position - start;
            let remaining = (buf.len() - written) as u64;
            // Clamp so a write never straddles into the next component; the
            // tail takes the full remainder and may grow.
            let clamped = if index == self.streams.len() - 1 {
                remaining
            } else {
                let capacity = self.streams[index].borrow().len()?.saturating_sub(in_stream);
                remaining.min(capacity)
            };
            let chunk = clamped as usize;
            {
                let mut child = self.streams[index].borrow_mut();
                child.set_position(in_stream)?;
                child.write(&buf[written..written + chunk])?;
            }
            written += chunk;
            self.position += chunk as u64;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()?;
        for stream in &self.streams {
            stream.borrow_mut().flush()?;
        }
        Ok(())
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        let mut parts = Vec::with_capacity(self.streams.len());
        let mut start = 0;
        for stream in &self.streams {
            let length = stream.borrow().len()?;
            parts.push((stream.clone(), start));
            start += length;
        }
        Ok(Extents::new(ConcatExtentIter {
            parts: parts.into_iter(),
            current: Vec::new().into_iter(),
        }))
    }

    fn position_in_base_stream(&self, base: &StreamRef, position: u64) -> Result<Option<u64>> {
        self.ensure_live()?;
        if base.borrow().stream_id() == self.id {
            return Ok(Some(position));
        }
        let (index, start) = self.select(position)?;
        self.streams[index]
            .borrow()
            .position_in_base_stream(base, position - start)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.ownership == Ownership::Dispose {
            for stream in &self.streams {
                stream.borrow_mut().dispose();
            }
        }
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ConcatStream {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}

/// Walks the components in order, pulling each one's extents only when the
/// iterator reaches it, translated by the component's cumulative offset.
struct ConcatExtentIter {
    parts: std::vec::IntoIter<(StreamRef, u64)>,
    current: std::vec::IntoIter<Extent>,
}

impl Iterator for ConcatExtentIter {
    type Item = Extent;

    fn next(&mut self) -> Option<Extent> {
        loop {
            if let Some(extent) = self.current.next() {
                return Some(extent);
            }
            let (stream, start) = self.parts.next()?;
            let child = stream.borrow();
            self.current = match child.extents() {
                Ok(iter) => iter.map(|e| e.shift(start)).collect::<Vec<_>>().into_iter(),
                // A component disposed mid-iteration has nothing to report.
                Err(_) => Vec::new().into_iter(),
            };
        }
    }
}
