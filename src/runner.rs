// src/runner.rs
//
// Execution boundary against the IPsec subsystem: bring a tunnel up, bring
// it down, query aggregate status. Classification of the raw status text is
// kept separate from execution so the policy can evolve without touching
// this boundary.
use log::debug;
use tokio::process::Command;

use crate::controller::ConnectionStatus;
use crate::error::{VpnError, VpnResult};

/// Secondary success evidence for `up`; the tool's exit codes are not fully
/// reliable for asynchronous operations.
const UP_SUCCESS_MARKERS: &[&str] = &["established successfully", "initiating"];
/// Secondary success evidence for `down`.
const DOWN_SUCCESS_MARKERS: &[&str] = &["deleting IKE_SA", "closed successfully"];
/// Markers indicating a negotiation in progress for a named connection.
const CONNECTING_MARKERS: &[&str] = &[
    "CONNECTING",
    "IKE_AUTH",
    "CHILD_CREATE",
    "initiating",
    "establishing",
];

/// Invokes the external `ipsec` binary through sudo (the direct deployment
/// variant; the helper variant routes the same operations through the
/// privileged channel instead).
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Whether an `ipsec` binary is on PATH at all.
    pub async fn available() -> bool {
        Command::new("which")
            .arg("ipsec")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub async fn up(&self, name: &str) -> VpnResult<String> {
        let output = run_ipsec(&["up", name]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || UP_SUCCESS_MARKERS.iter().any(|m| stdout.contains(m)) {
            Ok(format!("IPsec connection \"{name}\" initiated successfully."))
        } else {
            Err(VpnError::CommandFailed(error_text(&output)))
        }
    }

    pub async fn down(&self, name: &str) -> VpnResult<String> {
        let output = run_ipsec(&["down", name]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || DOWN_SUCCESS_MARKERS.iter().any(|m| stdout.contains(m)) {
            Ok(format!("IPsec connection \"{name}\" terminated successfully."))
        } else {
            Err(VpnError::CommandFailed(error_text(&output)))
        }
    }

    /// Raw aggregate status text for classification by the caller. A failed
    /// invocation is an error, never silently "disconnected".
    pub async fn status(&self) -> VpnResult<String> {
        let output = run_ipsec(&["status"]).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(VpnError::CommandFailed(error_text(&output)))
        }
    }
}

async fn run_ipsec(args: &[&str]) -> VpnResult<std::process::Output> {
    debug!("exec: sudo ipsec {}", args.join(" "));
    Command::new("sudo")
        .arg("ipsec")
        .args(args)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VpnError::CommandNotFound
            } else {
                VpnError::CommandFailed(e.to_string())
            }
        })
}

/// Error detail verbatim from the tool: stderr preferred, stdout fallback.
fn error_text(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("ipsec exited with {}", output.status)
}

/// Classifies raw status text for one connection name.
///
/// Precedence: an ESTABLISHED line naming the connection beats everything;
/// then negotiation markers; then the config-backed Disconnected versus
/// NotConfigured distinction.
pub fn classify_status(raw: &str, name: &str, configured: bool) -> ConnectionStatus {
    if raw
        .lines()
        .any(|line| line.contains(name) && line.contains("ESTABLISHED"))
    {
        return ConnectionStatus::Connected;
    }
    if raw.lines().any(|line| {
        line.contains(name) && CONNECTING_MARKERS.iter().any(|m| line.contains(m))
    }) {
        return ConnectionStatus::Connecting;
    }
    if configured {
        ConnectionStatus::Disconnected
    } else {
        ConnectionStatus::NotConfigured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn established_line_classifies_as_connected() {
        let raw = "Security Associations (1 up, 0 connecting):\n        demo[3]: ESTABLISHED 17 minutes ago\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn negotiation_markers_classify_as_connecting() {
        let raw = "demo[3]: CONNECTING, 203.0.113.7[%any]...198.51.100.1[%any]\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Connecting
        );

        let raw = "demo[1]: IKE_AUTH request 1 pending\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Connecting
        );
    }

    #[test]
    fn established_beats_connecting_markers() {
        let raw = "demo[2]: initiating rekey\ndemo[3]: ESTABLISHED 2 seconds ago\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn configured_but_absent_is_disconnected() {
        let raw = "Security Associations (0 up, 0 connecting):\n  none\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Disconnected
        );
    }

    #[test]
    fn unconfigured_and_absent_is_not_configured() {
        let raw = "Security Associations (0 up, 0 connecting):\n  none\n";
        assert_eq!(
            classify_status(raw, "demo", false),
            ConnectionStatus::NotConfigured
        );
    }

    #[test]
    fn markers_for_other_connections_do_not_leak() {
        let raw = "other[1]: ESTABLISHED 3 minutes ago\nother[2]: CONNECTING\n";
        assert_eq!(
            classify_status(raw, "demo", true),
            ConnectionStatus::Disconnected
        );
    }
}
