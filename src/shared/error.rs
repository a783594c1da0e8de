//! Usage: Unified error model for the OAuth connection core.

pub type AuthResult<T> = Result<T, AuthError>;

/// Everything that can go wrong between "connect" being clicked and a
/// credential bundle landing in the store. All variants are recoverable at the
/// flow boundary; none of them should ever take the hosting application down.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// Another authorization attempt is already running in this process.
    #[error("an authorization flow is already in progress")]
    AlreadyInProgress,

    /// None of the registered loopback ports could be bound.
    #[error("no callback listener could be started on the registered ports")]
    NoListenerAvailable,

    /// The user never completed the consent round trip within the deadline.
    #[error("authorization timed out waiting for the browser callback")]
    Timeout,

    /// The callback carried a state token that does not match this attempt.
    #[error("authorization callback state mismatch")]
    StateMismatch,

    /// The callback carried neither a code nor an error.
    #[error("authorization callback did not include a code")]
    MissingCode,

    /// The provider redirected back with an explicit error.
    #[error("authorization denied by provider: {0}")]
    ProviderError(String),

    /// The exchange proxy answered with a non-success status.
    #[error("token exchange failed ({status}): {message}")]
    ExchangeFailed { status: u16, message: String },

    /// Network-level failure before any HTTP status existed.
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// I/O failure in the credential store while the encryption primitive
    /// reported itself available. Read paths degrade to absence instead.
    #[error("credential storage unavailable: {0}")]
    StorageUnavailable(String),
}
