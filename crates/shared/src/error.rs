use thiserror::Error;

/// Transport-level failures. Publishing while disconnected fails
/// synchronously; reconnection is handled by the connection manager and is
/// never a silent retry of the failed publish.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to the chat transport")]
    NotConnected,
    #[error("invalid chat server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("failed to send on the chat transport: {0}")]
    Send(String),
}

/// Failures of the REST collaborators (history, image upload, agreements).
/// These surface to the caller and never partially mutate a message store.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} is not configured")]
    Unavailable { service: &'static str },
    #[error("{service} request failed: {reason}")]
    Http { service: &'static str, reason: String },
    #[error("{service} returned status {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("a pending agreement already exists for this item")]
    DuplicatePendingAgreement,
}
