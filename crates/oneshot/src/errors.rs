use std::{error::Error, fmt::Display};

#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveError {
    /// The sender was dropped without sending a value.
    Closed,
    Other(String),
}

impl Error for ReceiveError {}

impl Display for ReceiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiveError::Closed => write!(f, "Channel closed"),
            ReceiveError::Other(msg) => write!(f, "Cannot wait for message: {}", msg),
        }
    }
}
