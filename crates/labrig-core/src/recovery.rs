//! Error-driven recovery dispatch.
//!
//! Devices remediate readiness failures with actions keyed on the failure
//! subkind (a not-responsive device gets rebooted, an incompletely booted
//! device gets waited on). A kind with no registered action is re-raised
//! unchanged, which tells the readiness controller that no remediation
//! exists for it.

use std::sync::Arc;

use crate::error::{CheckReadyError, ReadyErrorKind, Result};

type RecoveryAction = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Table of recovery actions keyed on [`ReadyErrorKind`], built once at
/// device construction time.
#[derive(Clone)]
pub struct RecoveryDispatcher {
    device: String,
    actions: Vec<(ReadyErrorKind, RecoveryAction)>,
}

impl RecoveryDispatcher {
    /// Creates an empty dispatcher for the named device. With no registered
    /// actions every error is re-raised unchanged.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            actions: Vec::new(),
        }
    }

    /// Registers a remediation action for one failure kind.
    pub fn on(
        mut self,
        kind: ReadyErrorKind,
        action: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push((kind, Arc::new(action)));
        self
    }

    /// Runs the action registered for the error's kind, or re-raises the
    /// error unchanged when no action is registered.
    pub fn dispatch(&self, error: CheckReadyError) -> Result<()> {
        match self.actions.iter().find(|(kind, _)| *kind == error.kind) {
            Some((kind, action)) => {
                tracing::info!("{} attempting recovery: device {}", self.device, kind);
                action()
            }
            None => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_runs_matching_action() {
        let reboots = Arc::new(AtomicUsize::new(0));
        let counter = reboots.clone();
        let dispatcher = RecoveryDispatcher::new("hub-1234").on(
            ReadyErrorKind::NotResponsive,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        dispatcher
            .dispatch(CheckReadyError::not_responsive("hub-1234", "no response"))
            .unwrap();
        assert_eq!(reboots.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandled_kind_is_reraised_unchanged() {
        let dispatcher =
            RecoveryDispatcher::new("hub-1234").on(ReadyErrorKind::NotResponsive, || Ok(()));

        let original = CheckReadyError::not_connected("hub-1234", "device not found on host");
        let expected = original.to_string();
        let err = dispatcher.dispatch(original).unwrap_err();
        match err {
            RigError::CheckReady(err) => {
                assert_eq!(err.kind, ReadyErrorKind::NotConnected);
                assert_eq!(err.to_string(), expected);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_action_failure_propagates() {
        let dispatcher = RecoveryDispatcher::new("hub-1234").on(
            ReadyErrorKind::NotResponsive,
            || Err(RigError::Device("reboot failed".into())),
        );
        let err = dispatcher
            .dispatch(CheckReadyError::not_responsive("hub-1234", "no response"))
            .unwrap_err();
        assert!(matches!(err, RigError::Device(_)));
    }
}
