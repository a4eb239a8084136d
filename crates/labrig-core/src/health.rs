//! Ordered, fail-fast health-check execution.
//!
//! A device declares an ordered list of named, zero-argument checks. The
//! pipeline runs them strictly in order and stops at the first readiness
//! failure: later checks may assume the invariants established by earlier
//! ones, so the fail-fast ordering is a functional requirement, not an
//! optimization. A check failing with any non-readiness error is not caught
//! specially and propagates as a fatal, unexpected failure.

use std::sync::Arc;

use crate::error::{Result, RigError};

/// One named readiness check. The closure blocks the calling thread for the
/// full duration of any device I/O it performs; timeouts belong to the
/// underlying transport.
#[derive(Clone)]
pub struct HealthCheck {
    name: &'static str,
    run: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl HealthCheck {
    /// Creates a named check.
    pub fn new(name: &'static str, run: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            name,
            run: Arc::new(run),
        }
    }

    /// Name of the check (snake_case, by convention `check_...`).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn run(&self) -> Result<()> {
        (self.run)()
    }
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck").field("name", &self.name).finish()
    }
}

/// Executes `checks` in order, stopping at the first readiness failure.
///
/// On failure the error is returned with the names of the checks that passed
/// recorded on it; remaining checks never run.
pub fn run_health_checks(
    device: &str,
    device_type: &str,
    checks: &[HealthCheck],
) -> Result<()> {
    let total = checks.len();
    let mut checks_passed = Vec::new();
    for (step, check) in checks.iter().enumerate() {
        let pretty = pretty_name(check.name());
        match check.run() {
            Ok(()) => {
                checks_passed.push(format!("{}.{}", device_type, check.name()));
                tracing::info!(
                    "{} health check {}/{} succeeded: {}.",
                    device,
                    step + 1,
                    total,
                    pretty
                );
            }
            Err(RigError::CheckReady(mut err)) => {
                tracing::info!(
                    "{} health check {}/{} failed: {}.",
                    device,
                    step + 1,
                    total,
                    pretty
                );
                err.checks_passed = checks_passed;
                return Err(err.into());
            }
            Err(other) => return Err(other),
        }
    }
    Ok(())
}

/// `check_usb_hub_ready` -> `Check usb hub ready`.
fn pretty_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckReadyError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_check(
        name: &'static str,
        calls: &Arc<AtomicUsize>,
        result: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> HealthCheck {
        let calls = calls.clone();
        HealthCheck::new(name, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            result()
        })
    }

    #[test]
    fn test_stops_at_first_readiness_failure() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let checks = vec![
            counting_check("check_device_connected", &first, || Ok(())),
            counting_check("check_device_responsive", &second, || {
                Err(CheckReadyError::not_responsive("board-3f2a", "no response").into())
            }),
            counting_check("check_bootup_complete", &third, || Ok(())),
        ];

        let err = run_health_checks("board-3f2a", "devboard", &checks).unwrap_err();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);

        match err {
            RigError::CheckReady(err) => {
                assert!(err.to_string().contains("no response"));
                assert_eq!(err.checks_passed, vec!["devboard.check_device_connected"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_all_checks_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let checks = vec![
            counting_check("check_device_connected", &calls, || Ok(())),
            counting_check("check_device_responsive", &calls, || Ok(())),
        ];
        run_health_checks("board-3f2a", "devboard", &checks).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unexpected_error_propagates_unchanged() {
        let third = Arc::new(AtomicUsize::new(0));
        let checks = vec![
            HealthCheck::new("check_device_connected", || {
                Err(RigError::Device("transport exploded".into()))
            }),
            counting_check("check_device_responsive", &third, || Ok(())),
        ];
        let err = run_health_checks("board-3f2a", "devboard", &checks).unwrap_err();
        assert!(matches!(err, RigError::Device(_)));
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pretty_name() {
        assert_eq!(pretty_name("check_usb_hub_ready"), "Check usb hub ready");
    }
}
