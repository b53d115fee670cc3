// src/app.rs
//
// Console presentation adapter. The engine reports status through
// VpnMessages and receives toggle-requested events; everything rendered here
// could be swapped for a widget toolkit without touching the controller.
use chrono::Local;
use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::catalog::{ConfigStore, ConnectionDetails};
use crate::config::AppConfig;
use crate::controller::{ConnectionStatus, IpsecController, VpnMessage};
use crate::error::VpnError;
use crate::runner::{CommandRunner, classify_status};

fn store_for(config: &AppConfig) -> ConfigStore {
    ConfigStore::new(
        config.ipsec_conf_path.clone(),
        config.ipsec_conf_dir.clone(),
    )
}

fn render_status(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Error(detail) => format!("Error: {detail}"),
        other => other.label().to_string(),
    }
}

/// `list` subcommand: one connection name per line.
pub fn run_list(config: &AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::new()?;
    if !runtime.block_on(CommandRunner::available()) {
        println!("IPsec is not installed on this system.");
        return Ok(());
    }
    let catalog = store_for(config).load_catalog();
    if catalog.is_empty() {
        println!("No IPsec configurations found in system files.");
        return Ok(());
    }
    for name in catalog.names() {
        println!("{name}");
    }
    Ok(())
}

/// `status` subcommand: one-shot classification of the aggregate status.
pub fn run_status(config: &AppConfig, name: Option<String>) -> anyhow::Result<()> {
    let runtime = Runtime::new()?;
    let catalog = store_for(config).load_catalog();
    let Some(name) = name
        .or_else(|| config.last_used_connection.clone())
        .or_else(|| catalog.names().first().cloned())
    else {
        println!("No IPsec configurations found in system files.");
        return Ok(());
    };

    let status = runtime.block_on(async {
        if !CommandRunner::available().await {
            return ConnectionStatus::Unavailable;
        }
        match CommandRunner.status().await {
            Ok(raw) => classify_status(&raw, &name, catalog.contains(&name)),
            Err(VpnError::CommandNotFound) => ConnectionStatus::Unavailable,
            Err(e) => ConnectionStatus::Error(e.to_string()),
        }
    });

    println!("{name}: {}", render_status(&status));
    Ok(())
}

/// `details` subcommand: the parsed definition of one connection.
pub fn run_details(config: &AppConfig, name: &str) -> anyhow::Result<()> {
    let store = store_for(config);
    let details = store
        .details(name)
        .unwrap_or_else(|| ConnectionDetails::not_found(name));
    print_details(&details);
    Ok(())
}

fn print_details(details: &ConnectionDetails) {
    println!("Connection: {}", details.name);
    if details.source_file.as_os_str().is_empty() {
        println!("Config file: (not found)");
    } else {
        println!("Config file: {}", details.source_file.display());
    }
    println!("Server address: {}", details.server_address);
    let mut keys: Vec<&String> = details.attributes.keys().collect();
    keys.sort();
    for key in keys {
        println!("  {key} = {}", details.attributes[key]);
    }
}

/// Default mode: the interactive monitor. Runs the controller loop on a
/// background task, renders its messages, and feeds toggle commands typed on
/// stdin into it.
pub fn run_monitor(mut config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::new().expect("Failed to create Tokio runtime");
    let (message_tx, message_rx) = mpsc::channel();
    let (controller, worker) = IpsecController::new(&config, message_tx);
    runtime.spawn(worker.run());

    let stdin_rx = spawn_stdin_reader();
    let mut selected: Option<String> = config.last_used_connection.clone();

    println!("IPsec VPN client ready.");
    println!("Commands: on, off, status, details, use <name>, reload, quit");

    'monitor: loop {
        match message_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => render_message(message, &mut selected),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // Worker gone; shutdown finished.
            Err(mpsc::RecvTimeoutError::Disconnected) => break 'monitor,
        }

        while let Ok(line) = stdin_rx.try_recv() {
            let line = line.trim().to_string();
            match line.as_str() {
                "" => {}
                "quit" | "exit" => {
                    let _ = controller.shutdown();
                }
                "on" => match &selected {
                    Some(name) => {
                        let _ = controller.connect(name.clone());
                    }
                    None => println!("No connection selected."),
                },
                "off" => match &selected {
                    Some(name) => {
                        let _ = controller.disconnect(name.clone());
                    }
                    None => println!("No connection selected."),
                },
                "status" => {
                    println!("Status: {}", render_status(&controller.status()));
                    let _ = controller.refresh();
                }
                "details" => match &selected {
                    Some(name) => {
                        let _ = controller.get_details(name.clone());
                    }
                    None => println!("No connection selected."),
                },
                "reload" => {
                    let _ = controller.load_connections();
                }
                other => {
                    if let Some(name) = other.strip_prefix("use ") {
                        let name = name.trim().to_string();
                        selected = Some(name.clone());
                        let _ = controller.select_connection(name);
                    } else {
                        println!(
                            "Unknown command '{other}'. Try: on, off, status, details, use <name>, reload, quit"
                        );
                    }
                }
            }
        }
    }

    config.last_used_connection = selected;
    if let Err(e) = config.save() {
        log::warn!("could not save configuration: {e}");
    }
    Ok(())
}

fn render_message(message: VpnMessage, selected: &mut Option<String>) {
    let stamp = Local::now().format("%H:%M:%S");
    match message {
        VpnMessage::StatusUpdate(status) => {
            println!("[{stamp}] Status: {}", render_status(&status));
        }
        VpnMessage::ConnectionsList(names) => {
            if names.is_empty() {
                println!("[{stamp}] No IPsec connections configured.");
                *selected = None;
            } else {
                if selected.as_ref().is_none_or(|s| !names.contains(s)) {
                    *selected = names.first().cloned();
                }
                println!("[{stamp}] Connections: {}", names.join(", "));
            }
        }
        VpnMessage::ConnectionDetails(details) => print_details(&details),
        VpnMessage::LogMessage(text) => println!("[{stamp}] {text}"),
        VpnMessage::Error(text) => eprintln!("[{stamp}] ERROR: {text}"),
    }
}

/// Stdin lines forwarded through a channel; EOF becomes a quit command so a
/// closed terminal still tears the session down cleanly.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send("quit".to_string());
    });
    rx
}
