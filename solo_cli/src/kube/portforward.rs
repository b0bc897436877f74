use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::kube::ResourceRef;
use super::Result;

const KUBECTL_BIN: &str = "kubectl";
const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_DELAY_MS: u64 = 250;

/// A live port-forward tunnel to a pod.
///
/// The facade owns no global state across handles; dropping or stopping a
/// handle only affects its own tunnel.
pub struct PortForwardHandle {
    child: Child,
    local_port: u16,
    target: String,
}

impl PortForwardHandle {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop the tunnel and wait for it to close.
    ///
    /// Polls up to `max_attempts` times, spreading `timeout_ms` across the
    /// attempts; a tunnel that refuses to die is reported as an error.
    pub fn stop(mut self, max_attempts: u32, timeout_ms: u64) -> Result<()> {
        let _ = self.child.kill();
        let delay = Duration::from_millis(timeout_ms / u64::from(max_attempts.max(1)));
        for _ in 0..max_attempts.max(1) {
            match self.child.try_wait()? {
                Some(status) => {
                    debug!("port-forward to {} closed ({})", self.target, status);
                    return Ok(());
                }
                None => thread::sleep(delay),
            }
        }
        bail!("port-forward to {} did not stop", self.target)
    }
}

/// Spawn `kubectl port-forward` and wait until the local port accepts
/// connections.
pub fn start(
    context: &str,
    pod: &ResourceRef,
    local_port: u16,
    pod_port: u16,
) -> Result<PortForwardHandle> {
    let target = format!("pod/{}", pod.name());
    let mut child = Command::new(KUBECTL_BIN)
        .args(&[
            "--context",
            context,
            "-n",
            pod.namespace(),
            "port-forward",
            &target,
            &format!("{}:{}", local_port, pod_port),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format_err!("failed to spawn {}: {}", KUBECTL_BIN, e))?;

    for _ in 0..CONNECT_ATTEMPTS {
        if let Some(status) = child.try_wait()? {
            bail!("port-forward to {} exited early ({})", pod, status);
        }
        if TcpStream::connect(("127.0.0.1", local_port)).is_ok() {
            debug!("port-forward {} -> {}:{} up", pod, local_port, pod_port);
            return Ok(PortForwardHandle {
                child,
                local_port,
                target: pod.to_string(),
            });
        }
        thread::sleep(Duration::from_millis(CONNECT_DELAY_MS));
    }
    let _ = child.kill();
    bail!("port-forward to {} did not open port {}", pod, local_port)
}
