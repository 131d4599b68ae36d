use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine to the surrounding application.
///
/// Every per-action failure is recoverable: the caller may simply invoke the
/// operation again. `Clone` lets one in-flight authorization outcome be
/// handed to every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("no wallet signing provider is available")]
    ProviderUnavailable,
    #[error("chain {0} has no known art contest deployment")]
    UnsupportedChain(u64),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("failed to create compute instance: {0}")]
    InstanceCreation(String),
    #[error("signer rejected the decryption authorization request")]
    AuthorizationDenied,
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    /// The response was produced under a binding that a chain change has
    /// since replaced. Callers drop it.
    #[error("response belongs to a superseded instance binding")]
    StaleInstance,
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("invalid submission: {0}")]
    InvalidSubmission(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl EngineError {
    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::StaleInstance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("user rejected the request")]
    Rejected,
    #[error("wallet disconnected")]
    Disconnected,
    #[error("wallet rpc error: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay rejected request: {0}")]
    Rejected(String),
    #[error("relay transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("entry {0} not found")]
    NotFound(u64),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<WalletError> for EngineError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rejected => EngineError::AuthorizationDenied,
            WalletError::Disconnected => EngineError::ProviderUnavailable,
            WalletError::Rpc(msg) => EngineError::Wallet(msg),
        }
    }
}

impl From<RelayError> for EngineError {
    fn from(err: RelayError) -> Self {
        EngineError::DecryptionFailed(err.to_string())
    }
}

impl From<ContractError> for EngineError {
    fn from(err: ContractError) -> Self {
        EngineError::Contract(err.to_string())
    }
}
