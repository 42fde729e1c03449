use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Address is out of range, points at a missing segment, or the slot's
    /// exists bit is clear.
    #[error("address is not valid")]
    AddrNotValid,
    #[error("element is not a connector")]
    ElementNotConnector,
    #[error("element is not a link")]
    ElementNotLink,
    /// Subtype change would cross the element-kind boundary.
    #[error("invalid element type")]
    InvalidType,
    #[error("invalid params: {0}")]
    InvalidParams(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Segment limit reached and no released slot is available.
    #[error("memory is full: segment limit reached")]
    NoMemory,
    #[error("corrupted image: {0}")]
    Corruption(&'static str),
    #[error("parse error: {0}")]
    Parse(String),
}
