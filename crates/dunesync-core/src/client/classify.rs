//! Transport failure classification
//!
//! Maps reqwest errors onto [`TransportErrorKind`] by walking the error's
//! source chain. The classification drives logging and retry decisions only.

use crate::error::{SyncError, TransportErrorKind};
use std::error::Error as StdError;
use std::io::ErrorKind;
use tracing::{error, warn};

/// Classify a failed request
pub fn classify_transport_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(kind) = classify_io(io) {
                return kind;
            }
        }

        let text = cause.to_string().to_lowercase();
        if text.contains("connection closed") || text.contains("connection reset") {
            return TransportErrorKind::ConnectionClosed;
        }

        source = cause.source();
    }

    TransportErrorKind::Unknown
}

fn classify_io(io: &std::io::Error) -> Option<TransportErrorKind> {
    match io.kind() {
        ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => Some(TransportErrorKind::ConnectionClosed),
        ErrorKind::AddrNotAvailable | ErrorKind::AddrInUse => {
            Some(TransportErrorKind::ConnectionLimitExhausted)
        }
        _ if is_descriptor_exhaustion(io) => Some(TransportErrorKind::ConnectionLimitExhausted),
        _ => None,
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(io: &std::io::Error) -> bool {
    // EMFILE / ENFILE
    matches!(io.raw_os_error(), Some(24) | Some(23))
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_io: &std::io::Error) -> bool {
    false
}

/// Convert a reqwest error into a classified [`SyncError`], logging it
pub fn transport_error(err: reqwest::Error) -> SyncError {
    let kind = classify_transport_error(&err);
    match kind {
        TransportErrorKind::Unknown => error!("Connection failure: {} {}", kind, err),
        _ => warn!("Connection error: {}", kind),
    }

    SyncError::Transport {
        kind,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_kinds() {
        assert_eq!(
            classify_io(&io::Error::from(ErrorKind::TimedOut)),
            Some(TransportErrorKind::Timeout)
        );
        assert_eq!(
            classify_io(&io::Error::from(ErrorKind::ConnectionReset)),
            Some(TransportErrorKind::ConnectionClosed)
        );
        assert_eq!(
            classify_io(&io::Error::from(ErrorKind::BrokenPipe)),
            Some(TransportErrorKind::ConnectionClosed)
        );
        assert_eq!(
            classify_io(&io::Error::from(ErrorKind::AddrNotAvailable)),
            Some(TransportErrorKind::ConnectionLimitExhausted)
        );
        assert_eq!(classify_io(&io::Error::from(ErrorKind::ConnectionRefused)), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion() {
        assert_eq!(
            classify_io(&io::Error::from_raw_os_error(24)),
            Some(TransportErrorKind::ConnectionLimitExhausted)
        );
    }
}
