// src/helper.rs
//
// The privilege-elevated side of the helper protocol. This loop runs in a
// child process spawned through pkexec and owns root-level access to the
// `ipsec` and `systemctl` binaries; the unprivileged front-end only ever
// talks to it through stdin/stdout, one command line in, one response line
// out.
use log::warn;
use std::io::{self, BufRead, Write};
use std::process::{Command, Stdio};

pub const STATUS_CONNECTED: &str = "STATUS: connected";
pub const STATUS_DISCONNECTED: &str = "STATUS: disconnected";

#[derive(Debug, Clone, PartialEq)]
pub enum HelperRequest {
    Start,
    Stop,
    Restart,
    Status,
    Quit,
    Unknown(String),
}

impl HelperRequest {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "restart" => Self::Restart,
            "status" => Self::Status,
            "quit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

pub fn unknown_response(text: &str) -> String {
    format!("ERROR: Unknown command '{text}'")
}

/// Reads commands from stdin until `quit` or EOF. Every non-`quit` command
/// produces exactly one response line, flushed immediately; `quit` ends the
/// loop without a response.
pub fn run_helper_loop(connection: &str) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        match HelperRequest::parse(&line) {
            HelperRequest::Start => {
                run_root_command(&["systemctl", "start", "ipsec"]);
                run_root_command(&["ipsec", "up", connection]);
                writeln!(out, "{}", status_line(connection))?;
            }
            HelperRequest::Stop => {
                run_root_command(&["ipsec", "down", connection]);
                writeln!(out, "{}", status_line(connection))?;
            }
            HelperRequest::Restart => {
                run_root_command(&["systemctl", "restart", "ipsec"]);
                run_root_command(&["ipsec", "up", connection]);
                writeln!(out, "{}", status_line(connection))?;
            }
            HelperRequest::Status => {
                writeln!(out, "{}", status_line(connection))?;
            }
            HelperRequest::Quit => break,
            HelperRequest::Unknown(text) => {
                writeln!(out, "{}", unknown_response(&text))?;
            }
        }
        out.flush()?;
    }
    Ok(())
}

fn run_root_command(args: &[&str]) {
    let result = Command::new(args[0])
        .args(&args[1..])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        // Stdout carries the protocol; diagnostics go to stderr via the log.
        warn!("helper command {} failed to run: {e}", args.join(" "));
    }
}

/// Collapses `ipsec statusall` output to the boolean the channel carries.
fn status_line(connection: &str) -> String {
    let output = Command::new("ipsec").arg("statusall").output();
    match output {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout);
            if is_connected_output(&text, connection) {
                STATUS_CONNECTED.to_string()
            } else {
                STATUS_DISCONNECTED.to_string()
            }
        }
        Err(e) => {
            warn!("helper could not query ipsec status: {e}");
            STATUS_DISCONNECTED.to_string()
        }
    }
}

fn is_connected_output(status_output: &str, connection: &str) -> bool {
    status_output.contains("ESTABLISHED") && status_output.contains(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_protocol_command_set() {
        assert_eq!(HelperRequest::parse("start"), HelperRequest::Start);
        assert_eq!(HelperRequest::parse("stop"), HelperRequest::Stop);
        assert_eq!(HelperRequest::parse("restart"), HelperRequest::Restart);
        assert_eq!(HelperRequest::parse("status"), HelperRequest::Status);
        assert_eq!(HelperRequest::parse("quit"), HelperRequest::Quit);
        assert_eq!(HelperRequest::parse("  status \n"), HelperRequest::Status);
    }

    #[test]
    fn unknown_commands_echo_the_offending_text() {
        assert_eq!(
            HelperRequest::parse("frobnicate"),
            HelperRequest::Unknown("frobnicate".to_string())
        );
        assert_eq!(
            unknown_response("frobnicate"),
            "ERROR: Unknown command 'frobnicate'"
        );
    }

    #[test]
    fn connected_requires_both_established_and_the_name() {
        let up = "Connections:\n  fortigate-vpn: child: dynamic === 0.0.0.0/0\nSecurity Associations (1 up, 0 connecting):\n  fortigate-vpn[4]: ESTABLISHED 40 seconds ago\n";
        assert!(is_connected_output(up, "fortigate-vpn"));

        let other = "Security Associations (1 up, 0 connecting):\n  office[2]: ESTABLISHED 2 minutes ago\n";
        assert!(!is_connected_output(other, "fortigate-vpn"));

        let down = "Connections:\n  fortigate-vpn: child: dynamic === 0.0.0.0/0\nSecurity Associations (0 up, 0 connecting):\n  none\n";
        assert!(!is_connected_output(down, "fortigate-vpn"));
    }
}
