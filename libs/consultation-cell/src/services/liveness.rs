// libs/consultation-cell/src/services/liveness.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that in-flight work checks before writing session state.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Marks the session torn down. Returns `true` only for the first caller.
    pub fn revoke(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_reports_first_caller_only() {
        let liveness = Liveness::new();
        let shared = liveness.clone();

        assert!(shared.is_alive());
        assert!(liveness.revoke());
        assert!(!shared.revoke());
        assert!(!shared.is_alive());
    }
}
