// src/notify.rs
use log::debug;
use tokio::process::Command;

const NOTIFY_TITLE: &str = "VPN Manager";

/// Fire-and-forget desktop notification. Missing notification daemons are
/// common on headless setups; failures are logged and dropped.
pub fn send(message: &str) {
    match Command::new("notify-send").arg(NOTIFY_TITLE).arg(message).spawn() {
        Ok(_child) => {}
        Err(e) => debug!("notify-send unavailable: {e}"),
    }
}
