/// All error types that can occur when discovering or controlling Key Lights.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device answered with a non-2xx HTTP status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The HTTP request itself failed (connect, timeout, body decode).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service-discovery bus could not be reached or subscribed to.
    #[error("service bus error: {0}")]
    Bus(#[from] mdns_sd::Error),

    /// An external discovery tool could not be run.
    #[error("command {program:?} failed: {err}")]
    Command { program: String, err: std::io::Error },

    /// The controller's event loop has already shut down.
    #[error("controller is not running")]
    ControllerStopped,
}

impl Error {
    /// Create a new command error.
    pub fn command(program: &str, err: std::io::Error) -> Self {
        Error::Command {
            program: program.to_string(),
            err,
        }
    }

    /// Whether this error is an HTTP 404 from a device.
    ///
    /// Some Key Light firmware rejects brightness-only patches with 404; the
    /// write path uses this to decide on the full-payload retry. Only status
    /// 404 qualifies, never other client or server errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Status { status: 404, .. })
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
