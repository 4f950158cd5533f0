use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("move before beginning")]
    SeekBeforeStart,

    #[error("unable to reduce stream length to less than {0}")]
    ShrinkBelow(u64),

    #[error("stream has been disposed")]
    Disposed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("duplicate volume identity: {0}")]
    DuplicateVolume(String),
}
