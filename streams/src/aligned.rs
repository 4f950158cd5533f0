// Sector-aligned read cache over media that dislikes unaligned access
//
// Raw devices require reads at sector boundaries in whole-sector multiples;
// this view rounds every physical read and serves byte-granular requests
// from a bounded sector cache.

use std::collections::HashMap;
use std::io::SeekFrom;

use log::trace;
use strata_core::{
    absolute_position, read_at, Extent, Extents, Ownership, Result, SparseStream, StrataError,
    StreamId, StreamRef,
};

pub const SECTOR_SIZE: usize = 512;
const DEFAULT_CACHE_SECTORS: usize = 1000;

/// Read-only aligned view of an underlying stream.
pub struct AlignedStream {
    inner: StreamRef,
    ownership: Ownership,
    sector_size: usize,
    cache: HashMap<u64, Vec<u8>>,
    max_cache_sectors: usize,
    position: u64,
    disposed: bool,
    id: StreamId,
}

impl AlignedStream {
    /// 512-byte sectors, default cache limit.
    pub fn new(inner: StreamRef) -> Result<Self> {
        Self::with_geometry(inner, SECTOR_SIZE, DEFAULT_CACHE_SECTORS)
    }

    pub fn with_geometry(
        inner: StreamRef,
        sector_size: usize,
        max_cache_sectors: usize,
    ) -> Result<Self> {
        if sector_size == 0 {
            return Err(StrataError::InvalidArgument(
                "sector size must be non-zero".into(),
            ));
        }
        {
            let i = inner.borrow();
            if !i.can_read() || !i.can_seek() {
                return Err(StrataError::InvalidArgument(
                    "aligned stream requires a readable, seekable source".into(),
                ));
            }
        }
        Ok(Self {
            inner,
            ownership: Ownership::None,
            sector_size,
            cache: HashMap::new(),
            max_cache_sectors,
            position: 0,
            disposed: false,
            id: StreamId::next(),
        })
    }

    /// Take responsibility for disposing the source.
    pub fn owning(mut self) -> Self {
        self.ownership = Ownership::Dispose;
        self
    }

    /// Drop all cached sectors, e.g. after the source was written elsewhere.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(StrataError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Fetch one sector, zero-padded at end-of-stream, through the cache.
    fn read_sector(&mut self, sector: u64) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(&sector) {
            trace!("sector {} served from cache", sector);
            return Ok(cached.clone());
        }
        let offset = sector * self.sector_size as u64;
        trace!("reading sector {} at offset {:#x}", sector, offset);
        let mut buffer = vec![0u8; self.sector_size];
        read_at(&self.inner, offset, &mut buffer)?;
        if self.cache.len() < self.max_cache_sectors {
            self.cache.insert(sector, buffer.clone());
        }
        Ok(buffer)
    }
}

impl SparseStream for AlignedStream {
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
        self.inner.borrow().len()
    }

    fn set_len(&mut self, _value: u64) -> Result<()> {
        self.ensure_live()?;
        Err(StrataError::InvalidArgument(
            "aligned stream is read-only".into(),
        ))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let length = self.inner.borrow().len()?;
        let absolute = absolute_position(target, self.position, length)?;
        self.position = absolute;
        Ok(absolute)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        let length = self.inner.borrow().len()?;
        if self.position >= length {
            return Ok(0);
        }
        let count = buf.len().min((length - self.position) as usize);
        let sector_size = self.sector_size as u64;
        let mut copied = 0;
        while copied < count {
            let offset = self.position + copied as u64;
            let sector = offset / sector_size;
            let in_sector = (offset % sector_size) as usize;
            let data = self.read_sector(sector)?;
            let take = (self.sector_size - in_sector).min(count - copied);
            buf[copied..copied + take].copy_from_slice(&data[in_sector..in_sector + take]);
            copied += take;
        }
        self.position += count as u64;
        Ok(count)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        Err(StrataError::InvalidArgument(
            "aligned stream is read-only".into(),
        ))
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_live()
    }

    fn extents(&self) -> Result<Extents<'_>> {
        self.ensure_live()?;
        let inner = self.inner.borrow();
        let all: Vec<Extent> = inner.extents()?.collect();
        Ok(Extents::new(all.into_iter()))
    }

    fn position_in_base_stream(&self, base: &StreamRef, position: u64) -> Result<Option<u64>> {
        self.ensure_live()?;
        if base.borrow().stream_id() == self.id {
            return Ok(Some(position));
        }
        self.inner.borrow().position_in_base_stream(base, position)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.ownership == Ownership::Dispose {
            self.inner.borrow_mut().dispose();
        }
        self.cache.clear();
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
