//! File transfer to and from a device.
//!
//! The echo flavor streams file contents through shell `echo`/`cat` commands
//! on the command transport. It suits small text artifacts (configs, test
//! fixtures) on devices with no better channel; binary-capable flavors
//! (scp, adb) plug in behind the same interface.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use labrig_core::{downcast_arc, Capability, CapabilitySlot, Result, RigError};

use crate::capabilities::switch_power::str_arg;
use crate::transport::CommandTransport;

/// Canonical capability name.
pub const CAPABILITY: &str = "file_transfer";
/// Interface name in the capability registry.
pub const INTERFACE: &str = "file_transfer_base";
/// Echo flavor name.
pub const FLAVOR_ECHO: &str = "file_transfer_echo";

/// API every `file_transfer` flavor satisfies.
pub trait FileTransfer: Capability {
    /// Copies a local file onto the device.
    fn send_file_to_device(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Copies a device file to the host.
    fn recv_file_from_device(&self, remote_path: &str, local_path: &Path) -> Result<()>;
}

/// Shell echo flavor.
pub struct FileTransferEcho {
    device_name: String,
    transport: Arc<dyn CommandTransport>,
}

impl FileTransferEcho {
    /// Creates the flavor for one device.
    pub fn new(device_name: impl Into<String>, transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            device_name: device_name.into(),
            transport,
        }
    }
}

impl Capability for FileTransferEcho {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl FileTransfer for FileTransferEcho {
    fn send_file_to_device(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let contents = std::fs::read_to_string(local_path).map_err(|err| {
            RigError::Device(format!(
                "{} unable to read {}: {}",
                self.device_name,
                local_path.display(),
                err
            ))
        })?;
        self.transport
            .send_command(&format!("truncate {}", remote_path))?;
        for line in contents.lines() {
            self.transport
                .send_command(&format!("echo '{}' >> {}", line, remote_path))?;
        }
        Ok(())
    }

    fn recv_file_from_device(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let contents = self.transport.send_command(&format!("cat {}", remote_path))?;
        std::fs::write(local_path, contents).map_err(|err| {
            RigError::Device(format!(
                "{} unable to write {}: {}",
                self.device_name,
                local_path.display(),
                err
            ))
        })
    }
}

/// Views a cached capability instance as `file_transfer`.
pub fn as_file_transfer(cap: Arc<dyn Capability>) -> Result<Arc<dyn FileTransfer>> {
    downcast_arc::<FileTransferEcho>(cap)
        .map(|c| c as Arc<dyn FileTransfer>)
        .ok_or_else(|| {
            RigError::Device("capability instance does not implement file_transfer".into())
        })
}

/// Slot declaration for the echo flavor.
pub fn echo_slot(device_name: &str, transport: Arc<dyn CommandTransport>) -> CapabilitySlot {
    let name = device_name.to_string();
    CapabilitySlot::builder(CAPABILITY, FLAVOR_ECHO, move || {
        Ok(Arc::new(FileTransferEcho::new(name.clone(), transport.clone()))
            as Arc<dyn Capability>)
    })
    .method("send_file_to_device", |cap, args| {
        let local = str_arg(args, 0)?;
        let remote = str_arg(args, 1)?;
        echo(cap)?.send_file_to_device(Path::new(&local), &remote)?;
        Ok(Value::Null)
    })
    .method("recv_file_from_device", |cap, args| {
        let remote = str_arg(args, 0)?;
        let local = str_arg(args, 1)?;
        echo(cap)?.recv_file_from_device(&remote, Path::new(&local))?;
        Ok(Value::Null)
    })
    .build()
}

fn echo(cap: &dyn Capability) -> Result<&FileTransferEcho> {
    cap.as_any()
        .downcast_ref::<FileTransferEcho>()
        .ok_or_else(|| RigError::Device("capability instance has an unexpected flavor".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::io::Write;

    #[test]
    fn test_send_file_streams_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.cfg");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "baud=115200").unwrap();
        writeln!(file, "console=uart0").unwrap();

        let transport = MockTransport::new();
        transport.respond("truncate /etc/boot.cfg", "ok");
        transport.respond("echo 'baud=115200' >> /etc/boot.cfg", "ok");
        transport.respond("echo 'console=uart0' >> /etc/boot.cfg", "ok");

        let xfer = FileTransferEcho::new("board-3f2a", transport.clone());
        xfer.send_file_to_device(&path, "/etc/boot.cfg").unwrap();
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn test_recv_file_writes_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.txt");

        let transport = MockTransport::new();
        transport.respond("cat /etc/version", "2.3.1");

        let xfer = FileTransferEcho::new("board-3f2a", transport);
        xfer.recv_file_from_device("/etc/version", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2.3.1");
    }

    #[test]
    fn test_missing_local_file() {
        let transport = MockTransport::new();
        let xfer = FileTransferEcho::new("board-3f2a", transport.clone());
        let err = xfer
            .send_file_to_device(Path::new("/nonexistent/file"), "/tmp/x")
            .unwrap_err();
        assert!(err.to_string().contains("unable to read"));
        assert!(transport.sent().is_empty());
    }
}
