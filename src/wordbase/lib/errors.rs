use std::fmt;
use std::fmt::Display;

#[derive(Debug)]
pub enum DictError {
    IoError(::std::io::Error),
    EncodingError(::std::string::FromUtf8Error),
    Eof,
    Timeout,
    LineTooLong,
    InvalidDatabase(String),
    VirtualDatabase(String),
    InvalidStrategy(String),
    BackendError(String),
    CacheError(String),
    ConfigError(String),
}

impl Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DictError::IoError(ref e) => write!(f, "i/o error: {}", e),
            DictError::EncodingError(ref e) => write!(f, "encoding error: {}", e),
            DictError::Eof => write!(f, "connection closed by client"),
            DictError::Timeout => write!(f, "i/o timeout"),
            DictError::LineTooLong => {
                write!(f, "maximum command line length exceeded by client")
            }
            DictError::InvalidDatabase(ref name) => write!(f, "invalid database: {}", name),
            DictError::VirtualDatabase(ref msg) => write!(f, "{}", msg),
            DictError::InvalidStrategy(ref name) => write!(f, "invalid strategy: {}", name),
            DictError::BackendError(ref msg) => write!(f, "backend error: {}", msg),
            DictError::CacheError(ref msg) => write!(f, "cache error: {}", msg),
            DictError::ConfigError(ref msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DictError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            DictError::IoError(ref e) => Some(e),
            DictError::EncodingError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<::std::io::Error> for DictError {
    fn from(err: ::std::io::Error) -> DictError {
        match err.kind() {
            ::std::io::ErrorKind::TimedOut | ::std::io::ErrorKind::WouldBlock => {
                DictError::Timeout
            }
            ::std::io::ErrorKind::UnexpectedEof => DictError::Eof,
            _ => DictError::IoError(err),
        }
    }
}

impl From<::std::string::FromUtf8Error> for DictError {
    fn from(err: ::std::string::FromUtf8Error) -> DictError {
        DictError::EncodingError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn timeout_kind_maps_to_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        match DictError::from(err) {
            DictError::Timeout => (),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn wouldblock_kind_maps_to_timeout() {
        let err = io::Error::new(io::ErrorKind::WouldBlock, "resource unavailable");
        match DictError::from(err) {
            DictError::Timeout => (),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn other_io_kinds_stay_io() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
        match DictError::from(err) {
            DictError::IoError(_) => (),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
