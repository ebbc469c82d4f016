//! Command line tool for EZON fitness trackers
//!
//! Scans for trackers, remembers one, and sends it commands. Step data is
//! fetched, reassembled and summarised per hour.

use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use ezon_ble_controller::ble::{self, BleTransport};
use ezon_ble_controller::{
    DeviceIdentity, FileSettings, Session, SessionConfig, SessionHandle, SessionNotice,
    SettingsStore, session,
};
use ezon_proto::{Command, StepSummary, target_choices};

#[derive(Parser)]
#[command(name = "ezon-ble")]
#[command(about = "Talk to an EZON fitness tracker over BLE")]
struct Cli {
    /// Tracker address, defaults to the remembered one
    #[arg(short, long, global = true)]
    device: Option<String>,
    /// Send a connect probe every time the link comes up
    #[arg(long, global = true)]
    probe: bool,
    /// Log protocol traffic (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for trackers
    Scan {
        /// Scan duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },
    /// Remember a tracker by name or address (any EZON watch if omitted)
    Remember { target: Option<String> },
    /// Set or disable the alarm
    Alarm {
        #[command(subcommand)]
        action: AlarmAction,
    },
    /// Sync the watch clock to this computer
    SyncTime,
    /// Ask the watch to show its pairing pin
    Pin,
    /// Show the incoming call reminder on the watch
    Call,
    /// Send the connect probe
    Probe,
    /// Fetch and summarise the step series of one day
    Steps {
        /// Day to fetch, defaults to today
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Seconds to wait for the transfer
        #[arg(long, default_value = "60")]
        wait: u64,
    },
    /// Set or disable the daily step target
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Print everything the tracker sends
    Watch {
        #[arg(long, default_value = "30")]
        secs: u64,
    },
}

#[derive(Subcommand)]
enum AlarmAction {
    /// Arm the alarm at HH:MM
    Set {
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
    },
    Off,
}

#[derive(Subcommand)]
enum TargetAction {
    /// One of 1000, 2000, ... 10000
    Set {
        #[arg(value_parser = parse_target)]
        steps: u32,
    },
    Off,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_target(s: &str) -> Result<u32, String> {
    let steps: u32 = s.parse().map_err(|e| format!("not a number: {e}"))?;
    if target_choices().any(|choice| choice == steps) {
        return Ok(steps);
    }
    let choices: Vec<String> = target_choices().map(|c| c.to_string()).collect();
    Err(format!("target must be one of {}", choices.join(", ")))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Operation failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = FileSettings::open_default()?;

    match cli.command {
        Commands::Scan { duration } => scan_devices(duration).await,
        Commands::Remember { target } => remember(&settings, target.or(cli.device)).await,
        Commands::Alarm { action } => {
            let command = match action {
                AlarmAction::Set { time } => Command::SetAlarm {
                    hour: time.hour() as u8,
                    minute: time.minute() as u8,
                },
                AlarmAction::Off => Command::DisableAlarm,
            };
            send_once(&cli.device, cli.probe, &settings, command).await
        }
        Commands::SyncTime => {
            let command = Command::sync_time(&Local::now().naive_local())?;
            send_once(&cli.device, cli.probe, &settings, command).await
        }
        Commands::Pin => send_once(&cli.device, cli.probe, &settings, Command::RequestPin).await,
        Commands::Call => {
            send_once(&cli.device, cli.probe, &settings, Command::CallReminder).await
        }
        Commands::Probe => {
            send_once(&cli.device, cli.probe, &settings, Command::ConnectProbe).await
        }
        Commands::Target { action } => {
            let command = match action {
                TargetAction::Set { steps } => {
                    settings.write_target(steps)?;
                    Command::SetTarget { target: steps }
                }
                TargetAction::Off => Command::DisableTarget,
            };
            send_once(&cli.device, cli.probe, &settings, command).await
        }
        Commands::Steps { date, wait } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            fetch_steps(&cli.device, cli.probe, &settings, date, Duration::from_secs(wait)).await
        }
        Commands::Watch { secs } => {
            watch(&cli.device, cli.probe, &settings, Duration::from_secs(secs)).await
        }
    }
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for EZON trackers ({} seconds)...", duration);

    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(&adapter, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_ezon { " [EZON]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

async fn remember(
    settings: &FileSettings,
    target: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for EZON trackers...");
    let adapter = ble::get_adapter().await?;
    let device = ble::find_device(&adapter, target.as_deref()).await?;

    let identity = DeviceIdentity { name: device.name, address: device.address };
    settings.write_device_identity(&identity)?;
    println!("Remembered {} ({})", identity.name, identity.address);
    println!("  Saved to: {}", settings.path().display());
    Ok(())
}

/// A running session and its observer
struct Link {
    handle: SessionHandle,
    notices: UnboundedReceiver<SessionNotice>,
    task: JoinHandle<()>,
}

impl Link {
    async fn open(
        device: &Option<String>,
        probe: bool,
        settings: &FileSettings,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let address = match device {
            Some(address) => address.clone(),
            None => settings
                .read_device_identity()
                .map(|identity| identity.address)
                .ok_or("no tracker remembered, run `ezon-ble remember` or pass --device")?,
        };

        let adapter = ble::get_adapter().await?;
        let (handle, inbox) = session::channel();
        let transport = BleTransport::new(adapter, handle.event_sink());

        let mut config = SessionConfig::new(address.clone());
        config.probe_on_connect = probe;
        let mut session = Session::new(transport, config, settings);
        let notices = session.subscribe();
        let task = tokio::spawn(session.run(inbox));

        println!("Connecting to {}...", address);
        handle.connect().await?;

        Ok(Self { handle, notices, task })
    }

    async fn close(self) {
        if let Err(e) = self.handle.disconnect().await {
            tracing::warn!(error = %e, "disconnect failed");
        }
        drop(self.handle);
        let _ = self.task.await;
    }
}

async fn send_once(
    device: &Option<String>,
    probe: bool,
    settings: &FileSettings,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let link = Link::open(device, probe, settings).await?;
    let result = link.handle.send_command(command).await;
    link.close().await;
    result?;
    println!("Sent {}", command.name());
    Ok(())
}

async fn fetch_steps(
    device: &Option<String>,
    probe: bool,
    settings: &FileSettings,
    date: NaiveDate,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = Command::get_steps(&date)?;
    let mut link = Link::open(device, probe, settings).await?;
    link.handle.send_command(command).await?;
    println!("Reading steps for {}...", date);

    let outcome = tokio::time::timeout(wait, async {
        while let Some(notice) = link.notices.recv().await {
            match notice {
                SessionNotice::TransferProgress { bytes_so_far, expected } => {
                    println!("  {}/{}", bytes_so_far, expected);
                }
                SessionNotice::StepsReady { summary, .. } => return Some(summary),
                SessionNotice::Anomaly(anomaly) => println!("  warning: {}", anomaly),
                SessionNotice::Cleared => return None,
                _ => {}
            }
        }
        None
    })
    .await;
    link.close().await;

    match outcome {
        Ok(Some(summary)) => {
            print_summary(&summary, settings.read_target());
            Ok(())
        }
        Ok(None) => Err("tracker disconnected during the transfer".into()),
        Err(_) => Err(format!("no step data within {} seconds", wait.as_secs()).into()),
    }
}

fn print_summary(summary: &StepSummary, target: u32) {
    println!("\n{} steps", summary.total);
    if target > 0 {
        println!("  {:.0}% of {} target", summary.ratio_of_target * 100.0, target);
    }
    if !summary.is_full_day() {
        println!("  only {} of 1440 minutes received", summary.minutes);
    }
    if let Some(hour) = summary.busiest_hour() {
        println!("  busiest hour {:02}:00", hour);
    }
    println!();
    for (hour, steps) in summary.by_hour.iter().enumerate() {
        println!("  {:02}:00  {:>6}", hour, steps);
    }
}

async fn watch(
    device: &Option<String>,
    probe: bool,
    settings: &FileSettings,
    secs: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut link = Link::open(device, probe, settings).await?;
    println!("Watching for {} seconds...", secs.as_secs());

    let _ = tokio::time::timeout(secs, async {
        while let Some(notice) = link.notices.recv().await {
            match notice {
                SessionNotice::Data { text, hex } => println!("{}\n{}", text, hex),
                SessionNotice::Characteristics(characteristics) => {
                    for (uuid, name) in characteristics {
                        println!("  {} {}", uuid, name);
                    }
                }
                SessionNotice::StepsReady { summary, .. } => println!("{} steps", summary.total),
                other => println!("{:?}", other),
            }
        }
    })
    .await;

    link.close().await;
    Ok(())
}
