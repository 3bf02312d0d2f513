use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::WebWalletError;

/// Label of the one long-running wallet action allowed at a time.
///
/// Empty while idle. A task only clears the label it set itself, so a
/// late finisher never wipes the status of the action that followed it.
#[derive(Debug, Default)]
pub struct OperationStatus {
    label: Mutex<String>,
}

impl OperationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.label.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_begin(&self, label: &str) -> Result<(), WebWalletError> {
        let mut current = self.lock();
        if !current.is_empty() {
            return Err(WebWalletError::Busy(current.clone()));
        }
        *current = label.to_string();
        Ok(())
    }

    /// Like [`try_begin`](Self::try_begin), but the label is cleared when
    /// the returned guard is dropped, including on panic.
    pub fn begin(self: &Arc<Self>, label: &'static str) -> Result<StatusGuard, WebWalletError> {
        self.try_begin(label)?;
        Ok(StatusGuard {
            status: self.clone(),
            label,
        })
    }

    /// Clears the status if it still reads `label`.
    pub fn finish(&self, label: &str) -> bool {
        let mut current = self.lock();
        if *current == label {
            current.clear();
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<String> {
        let current = self.lock();
        if current.is_empty() {
            None
        } else {
            Some(current.clone())
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.lock().is_empty()
    }
}

pub struct StatusGuard {
    status: Arc<OperationStatus>,
    label: &'static str,
}

impl StatusGuard {
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.status.finish(self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_operation_at_a_time() {
        let status = OperationStatus::new();
        status.try_begin("Scanning").unwrap();
        let err = status.try_begin("Restoring").unwrap_err();
        assert_eq!(err.to_string(), "Another operation is in progress: Scanning");
        assert_eq!(status.current().as_deref(), Some("Scanning"));
    }

    #[test]
    fn test_finish_only_clears_own_label() {
        let status = OperationStatus::new();
        status.try_begin("Initializing").unwrap();
        assert!(!status.finish("Scanning"));
        assert!(status.is_busy());
        assert!(status.finish("Initializing"));
        assert_eq!(status.current(), None);
        status.try_begin("Scanning").unwrap();
    }

    #[test]
    fn test_guard_clears_on_drop() {
        let status = Arc::new(OperationStatus::new());
        {
            let guard = status.begin("Restoring").unwrap();
            assert_eq!(guard.label(), "Restoring");
            assert!(status.begin("Scanning").is_err());
        }
        assert!(!status.is_busy());
    }

    #[test]
    fn test_guard_survives_panic() {
        let status = Arc::new(OperationStatus::new());
        let inner = status.clone();
        let result = std::thread::spawn(move || {
            let _guard = inner.begin("Scanning").unwrap();
            panic!("wallet task died");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(status.current(), None);
    }
}
