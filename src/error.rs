use std::fmt;
use thiserror::Error;

use crate::currency::CurrencyParseError;
use crate::progress::TrackerError;
use crate::seed::SeedError;
use crate::summary::SummaryError;

/// Failure reported by a node module (gateway, consensus set, pool, wallet).
/// The message is surfaced to the user verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid directory '{0}': {1}")]
    InvalidDirectory(String, String),
    #[error("port {0} already in use")]
    PortInUse(u16),
    #[error("port {port} already in use by {application}")]
    PortInUseBy { port: u16, application: String },
    #[error("Unable to bind port {0}: {1}")]
    Bind(u16, String),
    #[error("Error reading config '{0}': {1}")]
    Unreadable(String, String),
    #[error("Error parsing config: {0}")]
    Parse(String),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Startup failed while creating one of the node modules.
#[derive(Error, Debug)]
pub enum ModuleStartupError {
    #[error("unable to create {module}: {source}")]
    Module {
        module: &'static str,
        #[source]
        source: NodeError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session ID does not exist.")]
    UnknownSession,
    #[error("Session already has a wallet attached.")]
    WalletAlreadyAttached,
    #[error("No wallet is attached to this session.")]
    NoWallet,
    #[error("Invalid wallet name '{0}'.")]
    InvalidWalletName(String),
    #[error("Wallet '{0}' already exists.")]
    WalletExists(String),
    #[error("Wallet '{0}' does not exist.")]
    WalletMissing(String),
    #[error("Wallet '{0}' is open in another session.")]
    WalletInUse(String),
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Collects every failure seen during a best-effort teardown instead of
/// stopping at the first one.
#[derive(Debug, Default)]
pub struct ErrorList {
    failures: Vec<(String, String)>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, what: impl Into<String>, err: impl fmt::Display) {
        self.failures.push((what.into(), err.to_string()));
    }

    pub fn check<E: fmt::Display>(&mut self, what: &str, result: Result<(), E>) {
        if let Err(e) = result {
            self.push(what, e);
        }
    }

    pub fn extend(&mut self, other: ShutdownError) {
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<(), ShutdownError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError {
                failures: self.failures,
            })
        }
    }
}

/// Every module that failed to close, in the order they were closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownError {
    pub failures: Vec<(String, String)>,
}

impl ShutdownError {
    pub fn modules(&self) -> Vec<&str> {
        self.failures.iter().map(|(what, _)| what.as_str()).collect()
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (what, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "error closing {}: {}", what, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}

#[derive(Error, Debug)]
pub enum WebWalletError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Startup(#[from] ModuleStartupError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Currency(#[from] CurrencyParseError),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("{0}")]
    Invalid(String),
    #[error("Another operation is in progress: {0}")]
    Busy(String),
    #[error("Node is not ready: {0}")]
    NotReady(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_keeps_order() {
        let mut errors = ErrorList::new();
        errors.check::<NodeError>("wallet", Ok(()));
        errors.check("transaction pool", Err(NodeError::new("pool busy")));
        errors.push("gateway", "listener gone");

        let err = errors.into_result().unwrap_err();
        assert_eq!(err.modules(), vec!["transaction pool", "gateway"]);
        assert_eq!(
            err.to_string(),
            "error closing transaction pool: pool busy; error closing gateway: listener gone"
        );
    }

    #[test]
    fn test_empty_error_list_is_ok() {
        assert!(ErrorList::new().into_result().is_ok());
    }
}
