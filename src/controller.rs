// src/controller.rs
//
// The only component the front-end talks to. Owns the connection catalog,
// the confirmed-versus-optimistic state split, the privileged channel (when
// the helper deployment is used) and the reconciliation loop. User actions
// arrive on a single command queue; results flow back as messages.
use log::{debug, info, warn};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::catalog::{ConfigStore, ConnectionCatalog, ConnectionDetails};
use crate::channel::PrivilegedChannel;
use crate::config::AppConfig;
use crate::error::{VpnError, VpnResult};
use crate::helper;
use crate::logbook::Logbook;
use crate::notify;
use crate::reconciler::Reconciler;
use crate::runner::{CommandRunner, classify_status};

/// Loop cadence; probing itself is gated by the reconciler.
const TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Disconnecting,
    NotConfigured,
    Unavailable,
    Error(String),
}

impl ConnectionStatus {
    pub fn label(&self) -> &str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Disconnecting => "Disconnecting...",
            ConnectionStatus::NotConfigured => "Not Configured",
            ConnectionStatus::Unavailable => "Unavailable",
            ConnectionStatus::Error(_) => "Error",
        }
    }
}

#[derive(Debug)]
pub enum VpnCommand {
    LoadConnections,
    SelectConnection(String),
    Connect(String),
    Disconnect(String),
    GetDetails(String),
    Refresh,
    Shutdown,
}

#[derive(Debug)]
pub enum VpnMessage {
    StatusUpdate(ConnectionStatus),
    ConnectionsList(Vec<String>),
    ConnectionDetails(ConnectionDetails),
    LogMessage(String),
    Error(String),
}

/// Confirmed ground-truth transitions that carry side effects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Connected,
    Disconnected,
}

/// Confirmed state owned by the controller. `last_known_connected` only
/// flips on a ground-truth read confirming the opposite value, never on an
/// optimistic UI action.
#[derive(Debug, Default)]
pub struct ControllerState {
    pub current_connection: Option<String>,
    pub last_known_connected: bool,
    pub last_refresh: Option<Instant>,
}

impl ControllerState {
    /// Applies one confirmed status and reports the edge, if any. Repeated
    /// confirmations of the same state report nothing.
    pub fn apply_confirmed(
        &mut self,
        status: &ConnectionStatus,
        now: Instant,
    ) -> Option<Transition> {
        self.last_refresh = Some(now);
        match status {
            ConnectionStatus::Connected if !self.last_known_connected => {
                self.last_known_connected = true;
                Some(Transition::Connected)
            }
            ConnectionStatus::Disconnected | ConnectionStatus::NotConfigured
                if self.last_known_connected =>
            {
                self.last_known_connected = false;
                Some(Transition::Disconnected)
            }
            _ => None,
        }
    }
}

/// True when a connect/disconnect must be dropped because the matching
/// transition is already in flight (rapid repeated toggle input).
pub fn is_redundant_command(current: &ConnectionStatus, connecting: bool) -> bool {
    match current {
        ConnectionStatus::Connecting => connecting,
        ConnectionStatus::Disconnecting => !connecting,
        _ => false,
    }
}

/// Cloneable handle held by the front-end.
#[derive(Clone)]
pub struct IpsecController {
    ui_status: Arc<Mutex<ConnectionStatus>>,
    command_tx: mpsc::Sender<VpnCommand>,
}

impl IpsecController {
    pub fn new(
        config: &AppConfig,
        message_tx: mpsc::Sender<VpnMessage>,
    ) -> (Self, ControllerWorker) {
        let (command_tx, command_rx) = mpsc::channel();
        let ui_status = Arc::new(Mutex::new(ConnectionStatus::NotConfigured));
        let logbook_dir = config
            .logbook_dir
            .clone()
            .unwrap_or_else(Logbook::default_dir);

        let worker = ControllerWorker {
            command_rx,
            message_tx,
            ui_status: Arc::clone(&ui_status),
            store: ConfigStore::new(
                config.ipsec_conf_path.clone(),
                config.ipsec_conf_dir.clone(),
            ),
            runner: CommandRunner,
            catalog: ConnectionCatalog::default(),
            state: ControllerState::default(),
            logbook: Logbook::new(logbook_dir),
            reconciler: Reconciler::new(
                Duration::from_secs(config.poll_interval_secs),
                Duration::from_secs(config.probe_debounce_secs),
            ),
            use_helper: config.use_helper,
            channel: None,
            preferred_connection: config.last_used_connection.clone(),
        };

        (
            Self {
                ui_status,
                command_tx,
            },
            worker,
        )
    }

    // --- Public methods to send commands to the worker ---
    pub fn load_connections(&self) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::LoadConnections)?;
        Ok(())
    }

    pub fn select_connection(&self, name: String) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::SelectConnection(name))?;
        Ok(())
    }

    pub fn connect(&self, name: String) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::Connect(name))?;
        Ok(())
    }

    pub fn disconnect(&self, name: String) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::Disconnect(name))?;
        Ok(())
    }

    pub fn get_details(&self, name: String) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::GetDetails(name))?;
        Ok(())
    }

    pub fn refresh(&self) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::Refresh)?;
        Ok(())
    }

    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.command_tx.send(VpnCommand::Shutdown)?;
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ui_status.lock().unwrap().clone()
    }
}

/// Worker side of the controller; runs as one background task and owns every
/// mutable resource, including the privileged channel.
pub struct ControllerWorker {
    command_rx: mpsc::Receiver<VpnCommand>,
    message_tx: mpsc::Sender<VpnMessage>,
    ui_status: Arc<Mutex<ConnectionStatus>>,
    store: ConfigStore,
    runner: CommandRunner,
    catalog: ConnectionCatalog,
    state: ControllerState,
    logbook: Logbook,
    reconciler: Reconciler,
    use_helper: bool,
    channel: Option<PrivilegedChannel>,
    preferred_connection: Option<String>,
}

impl ControllerWorker {
    pub async fn run(mut self) {
        self.handle_load_connections().await;
        info!("controller loop started");

        loop {
            loop {
                match self.command_rx.try_recv() {
                    Ok(command) => {
                        if !self.handle_command(command).await {
                            self.handle_shutdown().await;
                            return;
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        self.handle_shutdown().await;
                        return;
                    }
                }
            }

            let now = Instant::now();
            if self.state.current_connection.is_some()
                && !matches!(self.ui_status(), ConnectionStatus::Unavailable)
                && self.reconciler.probe_due(now)
            {
                self.refresh_ground_truth().await;
            }

            sleep(TICK).await;
        }
    }

    /// Returns false when the loop should shut down.
    async fn handle_command(&mut self, command: VpnCommand) -> bool {
        match command {
            VpnCommand::LoadConnections => self.handle_load_connections().await,
            VpnCommand::SelectConnection(name) => self.handle_select(name).await,
            VpnCommand::Connect(name) => self.handle_connect(name).await,
            VpnCommand::Disconnect(name) => self.handle_disconnect(name).await,
            VpnCommand::GetDetails(name) => self.handle_get_details(&name),
            VpnCommand::Refresh => {
                if self.reconciler.refresh_allowed(Instant::now()) {
                    self.refresh_ground_truth().await;
                }
            }
            VpnCommand::Shutdown => return false,
        }
        true
    }

    // --- Command handlers ---
    async fn handle_load_connections(&mut self) {
        self.send_log("Checking for existing IPsec configurations...");

        if !CommandRunner::available().await {
            self.catalog = ConnectionCatalog::default();
            self.state.current_connection = None;
            self.send(VpnMessage::ConnectionsList(Vec::new()));
            self.send_log("IPsec is not installed on this system.");
            self.set_status(ConnectionStatus::Unavailable);
            return;
        }

        self.catalog = self.store.load_catalog();
        let names = self.catalog.names().to_vec();
        self.send(VpnMessage::ConnectionsList(names.clone()));

        if names.is_empty() {
            self.state.current_connection = None;
            self.send_log(&VpnError::ConfigurationMissing.to_string());
            self.set_status(ConnectionStatus::NotConfigured);
            return;
        }

        let selected = self
            .state
            .current_connection
            .clone()
            .filter(|name| self.catalog.contains(name))
            .or_else(|| {
                self.preferred_connection
                    .clone()
                    .filter(|name| self.catalog.contains(name))
            })
            .or_else(|| names.first().cloned());

        if let Some(name) = selected {
            self.send_log(&format!("Loaded IPsec configuration: {name}"));
            self.state.current_connection = Some(name);
            // Disconnected pending the first ground-truth probe.
            self.set_status(ConnectionStatus::Disconnected);
            self.refresh_ground_truth().await;
        }
    }

    async fn handle_select(&mut self, name: String) {
        if !self.catalog.contains(&name) {
            self.send_error(&VpnError::NoConfigurationAvailable.to_string());
            return;
        }
        if self.state.current_connection.as_deref() == Some(name.as_str()) {
            return;
        }
        self.state.current_connection = Some(name.clone());
        self.handle_get_details(&name);
        self.refresh_ground_truth().await;
    }

    async fn handle_connect(&mut self, name: String) {
        let ui = self.ui_status();
        if is_redundant_command(&ui, true) {
            debug!("connect ignored, already connecting");
            return;
        }
        if matches!(ui, ConnectionStatus::Unavailable) || !self.catalog.contains(&name) {
            self.send_error(&VpnError::NoConfigurationAvailable.to_string());
            return;
        }

        self.state.current_connection = Some(name.clone());
        // Optimistic; never persisted into last_known_connected.
        self.set_status(ConnectionStatus::Connecting);
        self.send_log(&format!("Initiating IPsec connection: {name}..."));

        match self.dispatch_up(&name).await {
            Ok(message) => {
                self.send_log(&message);
                self.refresh_ground_truth().await;
            }
            Err(e) => self.report_command_failure(e),
        }
    }

    async fn handle_disconnect(&mut self, name: String) {
        let ui = self.ui_status();
        if is_redundant_command(&ui, false) {
            debug!("disconnect ignored, already disconnecting");
            return;
        }
        if matches!(ui, ConnectionStatus::Unavailable) || !self.catalog.contains(&name) {
            self.send_error(&VpnError::NoConfigurationAvailable.to_string());
            return;
        }

        self.set_status(ConnectionStatus::Disconnecting);
        self.send_log(&format!("Disconnecting IPsec connection: {name}..."));

        match self.dispatch_down(&name).await {
            Ok(message) => {
                self.send_log(&message);
                self.refresh_ground_truth().await;
            }
            Err(e) => self.report_command_failure(e),
        }
    }

    fn handle_get_details(&mut self, name: &str) {
        let details = self
            .store
            .details(name)
            .unwrap_or_else(|| ConnectionDetails::not_found(name));
        self.send(VpnMessage::ConnectionDetails(details));
    }

    async fn handle_shutdown(&mut self) {
        info!("controller loop shutting down");
        if let Some(channel) = self.channel.take() {
            channel.shutdown(self.state.last_known_connected).await;
        }
        if self.logbook.is_open() {
            self.logbook.append("Client shutting down.");
        }
        self.logbook.close();
    }

    // --- Ground truth and reconciliation ---
    async fn refresh_ground_truth(&mut self) {
        self.reconciler.note_probe(Instant::now());
        let confirmed = self.probe_status().await;
        if Reconciler::should_reconcile(&confirmed) {
            self.apply_confirmed(confirmed);
        }
    }

    async fn probe_status(&mut self) -> ConnectionStatus {
        let Some(name) = self.state.current_connection.clone() else {
            return ConnectionStatus::NotConfigured;
        };
        let configured = self.catalog.contains(&name);

        if self.use_helper {
            match self.helper_request("status").await {
                Ok(reply) if reply == helper::STATUS_CONNECTED => ConnectionStatus::Connected,
                Ok(reply) if reply == helper::STATUS_DISCONNECTED => {
                    if configured {
                        ConnectionStatus::Disconnected
                    } else {
                        ConnectionStatus::NotConfigured
                    }
                }
                Ok(other) => ConnectionStatus::Error(other),
                Err(e) => self.status_for_error(&e),
            }
        } else {
            match self.runner.status().await {
                Ok(raw) => classify_status(&raw, &name, configured),
                Err(e) => self.status_for_error(&e),
            }
        }
    }

    /// Pushes a confirmed status through the edge-triggered path and renders
    /// it. Side effects fire once per transition, not once per observation.
    fn apply_confirmed(&mut self, confirmed: ConnectionStatus) {
        let name = self.state.current_connection.clone().unwrap_or_default();
        match self.state.apply_confirmed(&confirmed, Instant::now()) {
            Some(Transition::Connected) => {
                self.logbook.open(&name);
                if let Some(path) = self.logbook.path() {
                    debug!("session log at {}", path.display());
                }
                notify::send(&format!("VPN connected to {name}."));
                self.send_log(&format!("Connected to {name}. Log file created."));
            }
            Some(Transition::Disconnected) => {
                self.send_log(&format!("Disconnected from {name}."));
                self.logbook.close();
                notify::send("VPN disconnected.");
            }
            None => {}
        }
        self.set_status(confirmed);
    }

    fn status_for_error(&self, error: &VpnError) -> ConnectionStatus {
        match error {
            // Remediation differs (install the IPsec stack), so keep this
            // distinct from transient failures.
            VpnError::CommandNotFound => ConnectionStatus::Unavailable,
            other => ConnectionStatus::Error(other.to_string()),
        }
    }

    /// Reverts the toggle to the last confirmed ground truth and surfaces
    /// the failure.
    fn report_command_failure(&mut self, error: VpnError) {
        self.send_error(&error.to_string());
        let status = match error {
            VpnError::CommandNotFound => ConnectionStatus::Unavailable,
            _ if self.state.last_known_connected => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        };
        self.set_status(status);
    }

    // --- Command dispatch (direct sudo variant or privileged helper) ---
    async fn dispatch_up(&mut self, name: &str) -> VpnResult<String> {
        if self.use_helper {
            let reply = self.helper_request("start").await?;
            if reply.starts_with("ERROR:") {
                return Err(VpnError::CommandFailed(reply));
            }
            Ok(format!("IPsec connection \"{name}\" initiated successfully."))
        } else {
            self.runner.up(name).await
        }
    }

    async fn dispatch_down(&mut self, name: &str) -> VpnResult<String> {
        if self.use_helper {
            let reply = self.helper_request("stop").await?;
            if reply.starts_with("ERROR:") {
                return Err(VpnError::CommandFailed(reply));
            }
            Ok(format!("IPsec connection \"{name}\" terminated successfully."))
        } else {
            self.runner.down(name).await
        }
    }

    /// Sends one command over the privileged channel, authenticating on
    /// first use and re-authenticating at most once when an established
    /// session stops responding.
    async fn helper_request(&mut self, command: &str) -> VpnResult<String> {
        let name = self
            .state
            .current_connection
            .clone()
            .ok_or(VpnError::NoConfigurationAvailable)?;

        let mut channel = match self.channel.take() {
            Some(mut existing) => {
                if existing.is_alive().await {
                    existing
                } else {
                    warn!("helper session stopped responding, re-authenticating");
                    drop(existing);
                    match PrivilegedChannel::authenticate(&name).await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            debug!("re-authentication failed: {e}");
                            return Err(VpnError::AuthenticationExpired);
                        }
                    }
                }
            }
            None => PrivilegedChannel::authenticate(&name).await?,
        };

        let result = channel.request(command).await;
        self.channel = Some(channel);
        result
    }

    // --- Messaging helpers ---
    fn ui_status(&self) -> ConnectionStatus {
        self.ui_status.lock().unwrap().clone()
    }

    fn set_status(&mut self, new_status: ConnectionStatus) {
        {
            let mut guard = self.ui_status.lock().unwrap();
            if *guard == new_status {
                return;
            }
            *guard = new_status.clone();
        }
        self.send(VpnMessage::StatusUpdate(new_status));
    }

    /// Status messages go to the front-end and, while a session log is open,
    /// into the connection logbook as well.
    fn send_log(&mut self, message: &str) {
        debug!("{message}");
        self.logbook.append(message);
        self.send(VpnMessage::LogMessage(message.to_string()));
    }

    fn send_error(&self, message: &str) {
        warn!("{message}");
        self.send(VpnMessage::Error(message.to_string()));
    }

    fn send(&self, message: VpnMessage) {
        if let Err(e) = self.message_tx.send(message) {
            warn!("failed to send message to front-end: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_sequence(statuses: &[ConnectionStatus]) -> Vec<Transition> {
        let mut state = ControllerState::default();
        let now = Instant::now();
        statuses
            .iter()
            .filter_map(|status| state.apply_confirmed(status, now))
            .collect()
    }

    #[test]
    fn side_effects_are_edge_triggered_not_level_triggered() {
        use ConnectionStatus::{Connected, Disconnected};
        let transitions = apply_sequence(&[
            Disconnected,
            Disconnected,
            Connected,
            Connected,
            Connected,
            Disconnected,
        ]);
        assert_eq!(
            transitions,
            [Transition::Connected, Transition::Disconnected]
        );
    }

    #[test]
    fn error_and_unavailable_never_flip_the_confirmed_flag() {
        let mut state = ControllerState {
            last_known_connected: true,
            ..Default::default()
        };
        let now = Instant::now();
        assert_eq!(
            state.apply_confirmed(&ConnectionStatus::Error("boom".to_string()), now),
            None
        );
        assert_eq!(
            state.apply_confirmed(&ConnectionStatus::Unavailable, now),
            None
        );
        assert!(state.last_known_connected);
    }

    #[test]
    fn losing_the_configuration_counts_as_a_disconnect_edge() {
        let mut state = ControllerState {
            last_known_connected: true,
            ..Default::default()
        };
        let edge = state.apply_confirmed(&ConnectionStatus::NotConfigured, Instant::now());
        assert_eq!(edge, Some(Transition::Disconnected));
        assert!(!state.last_known_connected);
    }

    #[test]
    fn repeated_connect_during_connecting_dispatches_once() {
        // First connect: not redundant while Disconnected, dispatch runs and
        // the UI flips to the optimistic Connecting.
        let mut dispatched = 0;
        let mut ui = ConnectionStatus::Disconnected;
        for _ in 0..2 {
            if !is_redundant_command(&ui, true) {
                dispatched += 1;
                ui = ConnectionStatus::Connecting;
            }
        }
        assert_eq!(dispatched, 1);
    }

    #[test]
    fn redundant_guard_matches_only_the_same_direction() {
        assert!(is_redundant_command(&ConnectionStatus::Connecting, true));
        assert!(!is_redundant_command(&ConnectionStatus::Connecting, false));
        assert!(is_redundant_command(&ConnectionStatus::Disconnecting, false));
        assert!(!is_redundant_command(&ConnectionStatus::Disconnecting, true));
        assert!(!is_redundant_command(&ConnectionStatus::Connected, true));
        assert!(!is_redundant_command(&ConnectionStatus::Disconnected, false));
    }

    #[test]
    fn status_labels_match_the_ui_vocabulary() {
        assert_eq!(ConnectionStatus::Connected.label(), "Connected");
        assert_eq!(ConnectionStatus::Connecting.label(), "Connecting...");
        assert_eq!(ConnectionStatus::NotConfigured.label(), "Not Configured");
        assert_eq!(
            ConnectionStatus::Error("detail".to_string()).label(),
            "Error"
        );
    }
}
