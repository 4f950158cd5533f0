// Stream extents and the set algebra sparse streams are built on

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range `[start, start + length)` of byte offsets.
///
/// A stream's extent list describes the regions that hold explicit data;
/// everything outside it reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub start: u64,
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// First offset past the extent.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    /// Overlapping portion of two extents, if any.
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        if start < end {
            Some(Extent::new(start, end - start))
        } else {
            None
        }
    }

    /// The extent translated forward by `delta` bytes.
    pub fn shift(&self, delta: u64) -> Extent {
        Extent::new(self.start + delta, self.length)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Sort, drop empty extents, and merge overlapping or adjacent neighbours.
pub fn normalize(mut extents: Vec<Extent>) -> Vec<Extent> {
    extents.retain(|e| !e.is_empty());
    extents.sort();
    let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
    for extent in extents {
        match merged.last_mut() {
            Some(last) if extent.start <= last.end() => {
                last.length = last.length.max(extent.end() - last.start);
            }
            _ => merged.push(extent),
        }
    }
    merged
}

/// Union of two extent sequences, normalised.
pub fn union(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    normalize(all)
}

/// Intersection of two extent sequences, normalised.
pub fn intersect(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let a = normalize(a.to_vec());
    let b = normalize(b.to_vec());
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if let Some(overlap) = a[i].intersection(&b[j]) {
            out.push(overlap);
        }
        if a[i].end() <= b[j].end() {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Extents of `a` not covered by `b`, normalised.
pub fn subtract(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let a = normalize(a.to_vec());
    let b = normalize(b.to_vec());
    let mut out = Vec::new();
    let mut j = 0;
    for extent in a {
        let mut cursor = extent.start;
        while j < b.len() && b[j].end() <= cursor {
            j += 1;
        }
        let mut k = j;
        while k < b.len() && b[k].start < extent.end() {
            if b[k].start > cursor {
                out.push(Extent::new(cursor, b[k].start - cursor));
            }
            cursor = cursor.max(b[k].end());
            k += 1;
        }
        if cursor < extent.end() {
            out.push(Extent::new(cursor, extent.end() - cursor));
        }
    }
    out
}

/// Every extent translated forward by `delta` bytes.
pub fn offset(extents: &[Extent], delta: u64) -> Vec<Extent> {
    extents.iter().map(|e| e.shift(delta)).collect()
}
