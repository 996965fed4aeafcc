use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Generic(&'static str),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("capture file error: {0}")]
    Pcap(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
    #[error("publish error: {0}")]
    Publish(String),
}

impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Error::Generic(s)
    }
}

impl Error {
    /// Test if the error is a receive timeout (no data available yet)
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::io;

    #[test]
    fn timeout_kinds() {
        let e: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(e.is_timeout());
        let e: Error = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(e.is_timeout());
        let e: Error = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(!e.is_timeout());
        assert!(!Error::Generic("x").is_timeout());
    }
}
