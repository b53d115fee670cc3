// src/channel.rs
//
// Lifecycle of the privilege-elevated helper child and the line-oriented
// request/response protocol over its standard streams. The channel is a
// single ordered pair of byte streams: exactly one command line out, then
// exactly one reply line back, never pipelined. Serialization is structural;
// the controller loop is the only owner.
use log::{info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use crate::error::{VpnError, VpnResult};

/// Bounded wait for the post-spawn authentication probe. pkexec gives no
/// programmatic "credentials accepted" signal; a reply to `status` is the
/// only proof of a live, authenticated session.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded wait for command replies; `start` covers a full IKE negotiation.
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period for the helper to exit after `quit` before it is killed.
const EXIT_WAIT: Duration = Duration::from_secs(2);

pub struct PrivilegedChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl PrivilegedChannel {
    /// Spawns this executable in helper mode through pkexec and probes the
    /// session once with `status`. A cancelled or failed prompt makes the
    /// child exit before answering, which surfaces here as
    /// `AuthenticationFailed`.
    pub async fn authenticate(connection: &str) -> VpnResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| VpnError::AuthenticationFailed(e.to_string()))?;
        let child = Command::new("pkexec")
            .arg(exe)
            .arg("--run-as-helper")
            .arg("--connection")
            .arg(connection)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VpnError::AuthenticationFailed(e.to_string()))?;

        let mut channel = Self::from_child(child)?;
        match channel.probe().await {
            Ok(reply) if !reply.is_empty() => {
                info!("privileged helper session established for '{connection}'");
                Ok(channel)
            }
            _ => {
                let _ = channel.child.start_kill();
                Err(VpnError::AuthenticationFailed(
                    "helper did not respond to the initial status probe".to_string(),
                ))
            }
        }
    }

    fn from_child(mut child: Child) -> VpnResult<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VpnError::CommunicationFailure("helper stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VpnError::CommunicationFailure("helper stdout not piped".to_string()))?;
        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// One command line out, exactly one reply line back.
    pub async fn request(&mut self, command: &str) -> VpnResult<String> {
        self.request_with_timeout(command, REPLY_TIMEOUT).await
    }

    /// Short liveness probe used before dispatching user commands.
    pub async fn probe(&mut self) -> VpnResult<String> {
        self.request_with_timeout("status", PROBE_TIMEOUT).await
    }

    pub async fn is_alive(&mut self) -> bool {
        matches!(self.probe().await, Ok(ref reply) if !reply.is_empty())
    }

    async fn request_with_timeout(&mut self, command: &str, wait: Duration) -> VpnResult<String> {
        self.send_line(command).await?;
        match timeout(wait, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line.trim().to_string()),
            Ok(Ok(None)) => Err(VpnError::CommunicationFailure(
                "helper closed its output stream".to_string(),
            )),
            Ok(Err(e)) => Err(VpnError::CommunicationFailure(e.to_string())),
            Err(_) => Err(VpnError::CommunicationFailure(format!(
                "timed out waiting for reply to '{command}'"
            ))),
        }
    }

    async fn send_line(&mut self, command: &str) -> VpnResult<()> {
        self.stdin
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| VpnError::CommunicationFailure(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| VpnError::CommunicationFailure(e.to_string()))
    }

    /// Best-effort teardown: `stop` first when the tunnel is believed up,
    /// then `quit`, then close the streams, then a bounded wait before a
    /// forced kill. A failure at any step never blocks the next one.
    pub async fn shutdown(mut self, is_connected: bool) {
        for command in shutdown_commands(is_connected) {
            if *command == "quit" {
                // No response line follows quit; the read loop just ends.
                if let Err(e) = self.send_line(command).await {
                    warn!("helper shutdown: quit not delivered: {e}");
                }
            } else if let Err(e) = self.request(command).await {
                warn!("helper shutdown: '{command}' failed: {e}");
            }
        }

        let Self {
            mut child,
            stdin,
            lines: _lines,
        } = self;
        drop(stdin);

        match timeout(EXIT_WAIT, child.wait()).await {
            Ok(Ok(status)) => info!("helper exited with {status}"),
            Ok(Err(e)) => warn!("helper wait failed: {e}"),
            Err(_) => {
                warn!("helper did not exit in time, killing it");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

/// Order of protocol commands sent at shutdown.
pub fn shutdown_commands(is_connected: bool) -> &'static [&'static str] {
    if is_connected {
        &["stop", "quit"]
    } else {
        &["quit"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Stand-in for the real helper: same one-line-per-command framing,
    // without touching ipsec or pkexec.
    fn stub_helper() -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(
                r#"while read line; do
                     case "$line" in
                       status) echo 'STATUS: disconnected';;
                       quit) exit 0;;
                       *) echo "ERROR: Unknown command '$line'";;
                     esac
                   done"#,
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn stub helper")
    }

    #[tokio::test]
    async fn fresh_session_answers_the_status_probe() {
        let mut channel = PrivilegedChannel::from_child(stub_helper()).unwrap();
        let reply = channel.probe().await.unwrap();
        assert_eq!(reply, "STATUS: disconnected");
        channel.shutdown(false).await;
    }

    #[tokio::test]
    async fn unknown_command_gets_error_reply_and_session_stays_live() {
        let mut channel = PrivilegedChannel::from_child(stub_helper()).unwrap();
        let reply = channel.request("frobnicate").await.unwrap();
        assert_eq!(reply, "ERROR: Unknown command 'frobnicate'");
        assert!(channel.is_alive().await);
        channel.shutdown(false).await;
    }

    #[tokio::test]
    async fn dead_helper_surfaces_communication_failure() {
        let child = Command::new("true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn short-lived child");
        let mut channel = PrivilegedChannel::from_child(child).unwrap();
        // The child exits immediately; either the write or the read fails.
        let result = channel.request("status").await;
        assert!(matches!(result, Err(VpnError::CommunicationFailure(_))));
    }

    #[test]
    fn stop_precedes_quit_only_while_connected() {
        assert_eq!(shutdown_commands(true), ["stop", "quit"]);
        assert_eq!(shutdown_commands(false), ["quit"]);
    }
}
