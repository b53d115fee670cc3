use thiserror::Error;

/// Failures surfaced by the connection engine.
///
/// Every variant is recovered at the controller boundary and rendered as a
/// status/message pair for the front-end; nothing here should unwind past
/// the manager loop.
#[derive(Debug, Error)]
pub enum VpnError {
    #[error("No IPsec configurations found in system files")]
    ConfigurationMissing,

    #[error("No IPsec configuration available to connect")]
    NoConfigurationAvailable,

    #[error("IPsec command not found. Please ensure IPsec is installed and in PATH.")]
    CommandNotFound,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authentication expired or revoked")]
    AuthenticationExpired,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Communication with helper failed: {0}")]
    CommunicationFailure(String),
}

pub type VpnResult<T> = Result<T, VpnError>;
