use std::fmt;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub enum Error {
    /// The peer certificate could not be decoded as an X.509 certificate.
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(s) => write!(f, "malformed client certificate: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<rustls_pki_types::pem::Error> for Error {
    fn from(error: rustls_pki_types::pem::Error) -> Self {
        debug!("PEM error: {error:?}");
        Error::Malformed(format!("invalid PEM encoding: {error}"))
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(error: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        debug!("X.509 parse error: {error:?}");
        Error::Malformed(format!("{error}"))
    }
}

impl From<x509_parser::error::X509Error> for Error {
    fn from(error: x509_parser::error::X509Error) -> Self {
        debug!("X.509 error: {error:?}");
        Error::Malformed(format!("{error}"))
    }
}
