pub mod error;
pub mod extent;
pub mod stream;

pub use error::{Result, StrataError};
pub use extent::Extent;
pub use stream::{
    absolute_position, read_at, shared, Extents, Ownership, SparseStream, StreamId, StreamRef,
};
