use dvr_proto::protocol::FrameError;
use thiserror::Error;

/// Failure of a single exchange with the service.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error during command {command}: {source}")]
    Io {
        command: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed response to command {command}: {source}")]
    Frame {
        command: u32,
        #[source]
        source: FrameError,
    },

    #[error("service rejected command {command} with result {code:#x}")]
    Rejected { command: u32, code: u32 },
}

/// Everything the session controller can run into.  None of these cross into
/// the presentation layer as panics; they end up as snapshot fields.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("service {0} is not running")]
    ServiceUnavailable(String),

    #[error("unsupported config protocol version {version} (supported {min} - {max})")]
    UnsupportedVersion { version: u32, min: u32, max: u32 },

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("local address unavailable: {0}")]
    AddressUnavailable(String),

    #[error("no session with the capture service")]
    NotConnected,
}

impl ControlError {
    /// True for outcomes that are expected in normal operation and should not
    /// be logged above info level.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ControlError::ServiceUnavailable(_) | ControlError::AddressUnavailable(_)
        )
    }
}
