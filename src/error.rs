use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A layer was asked to run backward without the state its forward pass retains.
    InvalidState(String),
    /// The network or one of its layers is assembled or configured incorrectly.
    InvalidConfig(String),
    /// A batch does not have the dimensions a layer expects.
    InvalidShape(String),
    /// Reading or writing external data failed.
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
