//! Scripted transport doubles for tests and simulation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use labrig_core::{Result, RigError};

use crate::transport::{CommandTransport, TransportOpener};

/// Transport double with scripted responses and a call log.
///
/// One-shot results queued with [`MockTransport::enqueue`] are consumed
/// first; afterwards the default response registered with
/// [`MockTransport::respond`] is returned. Commands with neither fail.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<String>>>>,
    defaults: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Creates an empty scripted transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the default response for a command.
    pub fn respond(&self, command: &str, response: &str) {
        self.defaults
            .lock()
            .insert(command.to_string(), response.to_string());
    }

    /// Queues a one-shot result for a command, consumed before the default.
    pub fn enqueue(&self, command: &str, result: Result<String>) {
        self.queued
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(result);
    }

    /// Queues a one-shot failure for a command.
    pub fn enqueue_failure(&self, command: &str, error: RigError) {
        self.enqueue(command, Err(error));
    }

    /// Every command sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// How many times a command has been sent.
    pub fn sent_count(&self, command: &str) -> usize {
        self.log.lock().iter().filter(|c| *c == command).count()
    }
}

impl CommandTransport for MockTransport {
    fn send_command(&self, command: &str) -> Result<String> {
        self.log.lock().push(command.to_string());
        if let Some(queue) = self.queued.lock().get_mut(command) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        if let Some(response) = self.defaults.lock().get(command) {
            return Ok(response.clone());
        }
        Err(RigError::Device(format!(
            "no scripted response for '{}'",
            command
        )))
    }
}

/// Opener double mapping communication addresses to scripted transports.
#[derive(Default)]
pub struct MockOpener {
    transports: Mutex<HashMap<String, Arc<MockTransport>>>,
}

impl MockOpener {
    /// Creates an opener with no registered addresses.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the transport serving an address.
    pub fn register(&self, address: &str, transport: Arc<MockTransport>) {
        self.transports
            .lock()
            .insert(address.to_string(), transport);
    }
}

impl TransportOpener for MockOpener {
    fn open(&self, address: &str) -> Result<Arc<dyn CommandTransport>> {
        self.transports
            .lock()
            .get(address)
            .cloned()
            .map(|t| t as Arc<dyn CommandTransport>)
            .ok_or_else(|| RigError::Device(format!("no device at address '{}'", address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_results_run_before_default() {
        let transport = MockTransport::new();
        transport.respond("health", "ok");
        transport.enqueue_failure("health", RigError::Device("wedged".into()));

        assert!(transport.send_command("health").is_err());
        assert_eq!(transport.send_command("health").unwrap(), "ok");
        assert_eq!(transport.sent_count("health"), 2);
    }

    #[test]
    fn test_unscripted_command_fails() {
        let transport = MockTransport::new();
        assert!(transport.send_command("version").is_err());
        assert_eq!(transport.sent(), vec!["version".to_string()]);
    }

    #[test]
    fn test_opener_routes_by_address() {
        let opener = MockOpener::new();
        let transport = MockTransport::new();
        transport.respond("ping", "pong");
        opener.register("/dev/ttyUSB0", transport);

        let opened = opener.open("/dev/ttyUSB0").unwrap();
        assert_eq!(opened.send_command("ping").unwrap(), "pong");
        assert!(opener.open("/dev/ttyUSB1").is_err());
    }
}
