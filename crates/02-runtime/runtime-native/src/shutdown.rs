use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide cooperative cancellation flag.
///
/// Clones share the same flag. Whoever handles the termination signal calls
/// [`ShutdownFlag::trigger`]; the control loop checks it once per iteration.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Creates an untriggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            log::info!("shutdown requested");
        }
    }

    /// True once shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_trigger() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_triggered());
        flag.trigger();
        flag.trigger();
        assert!(other.is_triggered());
    }
}
