// src/logbook.rs
//
// Append-only per-connection event log. One file per connected session,
// opened on the confirmed transition to Connected and closed on the
// confirmed transition back. Writes are best-effort: a failure disables the
// current file instead of surfacing an error.
use chrono::Local;
use log::warn;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Logbook {
    dir: PathBuf,
    current: Option<PathBuf>,
}

impl Logbook {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, current: None }
    }

    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".vpnlogs")
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Creates `<name>_<timestamp>.log` with a header block and makes it the
    /// current file. No-op for an empty name.
    pub fn open(&mut self, connection: &str) {
        if connection.is_empty() {
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("cannot create log directory {}: {e}", self.dir.display());
            return;
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("{connection}_{stamp}.log"));
        let header = format!(
            "VPN IPsec Log - Connection: {connection}\nStart Time: {}\n{}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            "-".repeat(50),
        );

        match fs::write(&path, header) {
            Ok(()) => self.current = Some(path),
            Err(e) => {
                warn!("cannot create log file {}: {e}", path.display());
                self.current = None;
            }
        }
    }

    /// Appends a timestamped line to the current file; silently ignored when
    /// no session log is open.
    pub fn append(&mut self, message: &str) {
        let Some(path) = self.current.clone() else {
            return;
        };
        let line = format!("[{}] {message}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
        if let Err(e) = append_to(&path, &line) {
            warn!("log write to {} failed: {e}", path.display());
            self.current = None;
        }
    }

    /// Writes the end stamp and detaches the current file.
    pub fn close(&mut self) {
        if let Some(path) = self.current.take() {
            let footer = format!(
                "{}\nEnd Time: {}\n",
                "-".repeat(50),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
            );
            if let Err(e) = append_to(&path, &footer) {
                warn!("log close on {} failed: {e}", path.display());
            }
        }
    }
}

fn append_to(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ipsec-gui-logbook-{label}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn open_append_close_produces_framed_file() {
        let dir = temp_dir("frame");
        let mut logbook = Logbook::new(dir.clone());

        logbook.open("demo");
        assert!(logbook.is_open());
        let path = logbook.path().unwrap().to_path_buf();

        logbook.append("Connected to demo.");
        logbook.close();
        assert!(!logbook.is_open());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("VPN IPsec Log - Connection: demo"));
        assert!(content.contains("Connected to demo."));
        assert!(content.contains("End Time:"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn append_without_open_is_a_no_op() {
        let dir = temp_dir("noop");
        let mut logbook = Logbook::new(dir.clone());
        logbook.append("dropped");
        logbook.close();
        assert!(!dir.exists() || fs::read_dir(&dir).unwrap().next().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_connection_name_does_not_open_a_file() {
        let dir = temp_dir("empty");
        let mut logbook = Logbook::new(dir.clone());
        logbook.open("");
        assert!(!logbook.is_open());
        let _ = fs::remove_dir_all(dir);
    }
}
