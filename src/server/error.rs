use std::fmt;
use tracing::debug;

#[derive(Debug)]
pub enum Error {
    Unauthorized(String),
    NotFound,
    Initialization(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unauthorized(s) => write!(f, "unauthorized: {s}"),
            Error::NotFound => write!(f, "resource not found"),
            Error::Initialization(s) => write!(f, "initialization error: {s}"),
            Error::Internal(s) => write!(f, "internal server error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        debug!("I/O error: {error:?}");
        Error::Internal(format!("I/O error: {error}"))
    }
}

impl From<hyper::Error> for Error {
    fn from(error: hyper::Error) -> Self {
        debug!("Hyper error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("Hyper HTTP error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}
