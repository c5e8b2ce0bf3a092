//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use wifi_sentinel::classifier::features::extract_observation;
use wifi_sentinel::classifier::rules::label_for_capabilities;
use wifi_sentinel::classifier::{ClassifierInput, build_classifier};
use wifi_sentinel::core::config::Config;
use wifi_sentinel::core::errors::WsnError;
use wifi_sentinel::core::settings::{
    FileSettingsSource, SettingKey, Settings, SettingsSource, parse_switch,
};
use wifi_sentinel::daemon::alerts::AlertPolicy;
use wifi_sentinel::daemon::job::{JobContext, JobOutcome, ScheduledScanJob};
use wifi_sentinel::daemon::loop_main::{self, SentinelDaemon};
use wifi_sentinel::daemon::notifications::NotificationManager;
use wifi_sentinel::daemon::scheduler::CancelToken;
use wifi_sentinel::daemon::session::{LiveSnapshot, ScanSession, SessionContext, SessionHandle};
use wifi_sentinel::daemon::signals::SignalHandler;
use wifi_sentinel::daemon::state::JobState;
use wifi_sentinel::logger::dual::{
    ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger,
};
use wifi_sentinel::logger::sqlite::SqliteLogger;
use wifi_sentinel::pipeline::records::{NetworkObservation, NetworkRecord, RiskLabel};
use wifi_sentinel::platform::bluetooth::discover_with_bluetoothctl;
use wifi_sentinel::platform::location::location_from_config;
use wifi_sentinel::platform::pal::{SourceSpec, open_scan_source};
use wifi_sentinel::store::export::export_json;
use wifi_sentinel::store::network_store::{NetworkStore, StoreQuery};

/// Exit status for a job run that asked to be retried (`EX_TEMPFAIL`).
const EXIT_TEMPFAIL: i32 = 75;

/// WiFi Sentinel: scans nearby networks, labels their risk and alerts on insecure ones.
#[derive(Debug, Parser)]
#[command(
    name = "wsn",
    author,
    version,
    about = "WiFi Sentinel - insecure network watcher",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Scan source override: `nmcli` or `replay:<path>`.
    #[arg(long, global = true, value_name = "SOURCE")]
    source: Option<String>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the scheduled scan job forever, driven by signals.
    Daemon(DaemonArgs),
    /// Run one scan job cycle and exit (for timers and cron).
    Job(JobArgs),
    /// Live scan session in the terminal.
    Watch(WatchArgs),
    /// List persisted networks.
    List(ListArgs),
    /// Delete one persisted network.
    Delete(DeleteArgs),
    /// Delete every persisted network.
    Clear(ClearArgs),
    /// Export persisted networks as JSON.
    Export(ExportArgs),
    /// Label a single capability string.
    Classify(ClassifyArgs),
    /// Show or change the user preference switches.
    Settings(SettingsArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Show job state, dataset counts and recent activity.
    Status(StatusArgs),
    /// List nearby Bluetooth devices (not persisted).
    Bluetooth(BluetoothArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DaemonArgs {
    /// Skip the initial delay and run the first job right away.
    #[arg(long)]
    run_immediately: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct JobArgs {}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct WatchArgs {
    /// Stop after this many completed cycles.
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ListArgs {
    /// Case-insensitive SSID substring.
    #[arg(long, value_name = "TEXT")]
    ssid: Option<String>,
    /// Only this risk label (safe, medium, dangerous).
    #[arg(long, value_name = "LABEL")]
    label: Option<String>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DeleteArgs {
    /// Network name.
    ssid: String,
    /// Hardware address the record was stored under.
    bssid: String,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ClearArgs {
    /// Confirm removal of every record.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ExportArgs {
    /// Destination JSON file.
    path: PathBuf,
    /// Case-insensitive SSID substring.
    #[arg(long, value_name = "TEXT")]
    ssid: Option<String>,
    /// Only this risk label (safe, medium, dangerous).
    #[arg(long, value_name = "LABEL")]
    label: Option<String>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ClassifyArgs {
    /// Capability string as reported by the radio, e.g. `[WPA2-PSK-CCMP][ESS]`.
    #[arg(allow_hyphen_values = true)]
    capabilities: String,
    /// Signal strength in dBm.
    #[arg(long, default_value_t = -50, allow_hyphen_values = true)]
    rssi: i32,
    /// Channel frequency in MHz.
    #[arg(long, default_value_t = 2412)]
    frequency: u32,
    /// Network name (feeds the hidden/public features).
    #[arg(long, default_value = "")]
    ssid: String,
}

#[derive(Debug, Clone, Args, Serialize)]
struct SettingsArgs {
    #[command(subcommand)]
    command: Option<SettingsCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum SettingsCommand {
    /// Print all switches.
    Show,
    /// Flip one switch: `wsn settings set auto_scan on`.
    Set {
        /// auto_scan, auto_save, notifications or vibration.
        key: String,
        /// on or off.
        value: String,
    },
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and report the hash.
    Validate,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct StatusArgs {}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct BluetoothArgs {}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// The job cycle should be tried again later.
    #[error("job needs retry: {0}")]
    Retry(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Retry(_) => EXIT_TEMPFAIL,
        }
    }
}

impl From<WsnError> for CliError {
    fn from(err: WsnError) -> Self {
        match err {
            WsnError::InvalidConfig { .. }
            | WsnError::MissingConfig { .. }
            | WsnError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Job(args) => run_job(cli, args),
        Command::Watch(args) => run_watch(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Delete(args) => run_delete(cli, args),
        Command::Clear(args) => run_clear(cli, args),
        Command::Export(args) => run_export(cli, args),
        Command::Classify(args) => run_classify(cli, args),
        Command::Settings(args) => run_settings(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Bluetooth(args) => run_bluetooth(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

/// Effective config with the `--source` override applied and checked.
fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(source) = &cli.source {
        SourceSpec::parse(source)?;
        config.scanner.source.clone_from(source);
    }
    Ok(config)
}

fn parse_label(raw: Option<&str>) -> Result<Option<RiskLabel>, CliError> {
    raw.map(|s| {
        s.parse::<RiskLabel>()
            .map_err(|_| CliError::User(format!("unknown label {s:?}; expected safe, medium or dangerous")))
    })
    .transpose()
}

/// Send one activity event from a short-lived command and flush it.
fn log_activity(config: &Config, event: ActivityEvent) {
    match spawn_logger(DualLoggerConfig::from_paths(&config.paths)) {
        Ok((handle, join)) => {
            handle.send(event);
            handle.shutdown();
            let _ = join.join();
        }
        Err(e) => eprintln!("[WSN-STORE] activity log unavailable: {e}"),
    }
}

// ---------------------------------------------------------------------------
// daemon / job / watch
// ---------------------------------------------------------------------------

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let launch = loop_main::DaemonArgs {
        run_immediately: args.run_immediately,
    };
    let mut daemon = SentinelDaemon::init(config, &launch)?;
    daemon.run()?;
    Ok(())
}

fn run_job(cli: &Cli, _args: &JobArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (logger, logger_join) = spawn_logger(DualLoggerConfig::from_paths(&config.paths))?;
    let notifications = Arc::new(NotificationManager::from_config(&config.notifications));
    let ctx = match JobContext::from_config(&config, notifications, logger.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            logger.shutdown();
            let _ = logger_join.join();
            return Err(e.into());
        }
    };
    let classifier = Arc::clone(&ctx.classifier);
    let job = ScheduledScanJob::new(ctx, AlertPolicy::from_config(&config.alerts), config.job.clone())
        .with_state_file(&config.paths.state_file);

    let signals = SignalHandler::new();
    let token = CancelToken::linked(signals.shutdown_flag()).with_timeout(config.job.timeout());
    let outcome = job.do_work(&token);

    classifier.shutdown();
    logger.shutdown();
    let _ = logger_join.join();

    match output_mode(cli) {
        OutputMode::Human => print_job_outcome(&outcome),
        OutputMode::Json => {
            let payload = json!({
                "command": "job",
                "result": serde_json::to_value(&outcome)?,
                "consecutive_retries": job.state().consecutive_retries,
            });
            write_json_line(&payload)?;
        }
    }

    match outcome {
        JobOutcome::Success(_) => Ok(()),
        JobOutcome::Retry { reason } => Err(CliError::Retry(reason.to_string())),
    }
}

fn print_job_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Success(report) => {
            if let Some(skipped) = report.skipped {
                println!("{} ({})", "Job finished".green(), skipped.as_str());
                return;
            }
            println!("{}", "Job finished".green());
            println!(
                "  Observed: {}  Unique: {}  New: {}  Dangerous: {}",
                report.summary.observed,
                report.summary.unique,
                report.persisted.len(),
                report.summary.dangerous
            );
            if report.radio_switched_on {
                println!("  Radio was switched on for this run.");
            }
            if let Some(alert) = &report.alert {
                println!("  Alert: {}", alert.title.red().bold());
                for line in &alert.lines {
                    println!("    {line}");
                }
            }
            println!("  Duration: {}ms", report.duration_ms);
        }
        JobOutcome::Retry { reason } => {
            println!("{} {reason}", "Job will retry:".yellow());
        }
    }
}

fn session_context(config: &Config, logger: ActivityLoggerHandle) -> Result<SessionContext, CliError> {
    let spec = SourceSpec::parse(&config.scanner.source)?;
    Ok(SessionContext {
        source: open_scan_source(&spec, config.scanner.interface.as_deref())?,
        classifier: build_classifier(&config.classifier),
        location: location_from_config(&config.location),
        store: Arc::new(NetworkStore::open(&config.paths.dataset)),
        logger,
    })
}

fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (logger, logger_join) = spawn_logger(DualLoggerConfig::from_paths(&config.paths))?;
    let started = session_context(&config, logger.clone()).and_then(|ctx| {
        let classifier = Arc::clone(&ctx.classifier);
        let handle = ScanSession::new(ctx, config.session.clone()).spawn()?;
        Ok((classifier, handle))
    });
    let (classifier, handle) = match started {
        Ok(started) => started,
        Err(e) => {
            logger.shutdown();
            let _ = logger_join.join();
            return Err(e);
        }
    };
    let snapshots = handle.subscribe();

    let mode = output_mode(cli);
    let interactive =
        mode == OutputMode::Human && io::stdin().is_terminal() && io::stdout().is_terminal();
    let result = if interactive {
        watch_interactive(&handle, &snapshots, args.cycles)
    } else {
        watch_stream(&snapshots, args.cycles, mode)
    };

    handle.stop();
    classifier.shutdown();
    logger.shutdown();
    let _ = logger_join.join();
    result
}

/// Raw-mode loop: `p`/space toggles pause, `q`/Esc/Ctrl-C quits.
fn watch_interactive(
    handle: &SessionHandle,
    snapshots: &Receiver<LiveSnapshot>,
    max_cycles: Option<u64>,
) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    terminal::enable_raw_mode()?;
    let result = watch_interactive_inner(&mut stdout, handle, snapshots, max_cycles);
    let _ = terminal::disable_raw_mode();
    result
}

fn watch_interactive_inner(
    stdout: &mut io::Stdout,
    handle: &SessionHandle,
    snapshots: &Receiver<LiveSnapshot>,
    max_cycles: Option<u64>,
) -> Result<(), CliError> {
    write_raw_lines(
        stdout,
        &[format!(
            "{} (p/space: pause or resume, q: quit)",
            "Watching nearby networks".bold()
        )],
    )?;
    let mut seen = 0_u64;

    loop {
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(());
                }
                KeyCode::Char('p' | ' ') => {
                    handle.toggle();
                    // The loop thread applies the command asynchronously.
                    thread::sleep(Duration::from_millis(20));
                    write_raw_lines(stdout, &[format!("[{:?}]", handle.state()).dimmed().to_string()])?;
                }
                _ => {}
            }
        }

        match snapshots.try_recv() {
            Ok(snapshot) => {
                write_raw_lines(stdout, &snapshot_lines(&snapshot))?;
                seen += 1;
                if max_cycles.is_some_and(|n| seen >= n) {
                    return Ok(());
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(()),
        }
    }
}

fn write_raw_lines(stdout: &mut io::Stdout, lines: &[String]) -> Result<(), CliError> {
    for line in lines {
        write!(stdout, "{line}\r\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Line-oriented loop for pipes and `--json`; Ctrl-C stops it.
fn watch_stream(
    snapshots: &Receiver<LiveSnapshot>,
    max_cycles: Option<u64>,
    mode: OutputMode,
) -> Result<(), CliError> {
    let signals = SignalHandler::new();
    let mut seen = 0_u64;

    while !signals.should_shutdown() {
        match snapshots.recv_timeout(Duration::from_millis(200)) {
            Ok(snapshot) => {
                match mode {
                    OutputMode::Human => {
                        for line in snapshot_lines(&snapshot) {
                            println!("{line}");
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "watch",
                            "snapshot": serde_json::to_value(&snapshot)?,
                        });
                        write_json_line(&payload)?;
                    }
                }
                seen += 1;
                if max_cycles.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn snapshot_lines(snapshot: &LiveSnapshot) -> Vec<String> {
    let mut lines = vec![format!(
        "Cycle {} @ {}: {} networks ({} dangerous, {} new)",
        snapshot.cycle,
        snapshot.taken_at.format("%H:%M:%S"),
        snapshot.records.len(),
        snapshot.summary.dangerous,
        snapshot.persisted.len()
    )];
    lines.extend(snapshot.records.iter().map(|r| format!("  {}", record_row(r))));
    lines
}

// ---------------------------------------------------------------------------
// dataset commands
// ---------------------------------------------------------------------------

fn colored_label(label: RiskLabel) -> ColoredString {
    match label {
        RiskLabel::Safe => label.as_str().green(),
        RiskLabel::Medium => label.as_str().yellow(),
        RiskLabel::Dangerous => label.as_str().red().bold(),
    }
}

fn record_row(record: &NetworkRecord) -> String {
    format!(
        "{:<32}  {:<17}  {:>5}  {:>5}  {}",
        truncate(&record.ssid, 32),
        record.bssid,
        record.rssi,
        record.frequency,
        colored_label(record.label)
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let query = StoreQuery {
        ssid_contains: args.ssid.clone(),
        label: parse_label(args.label.as_deref())?,
    };
    let store = NetworkStore::open(&config.paths.dataset);
    let snapshot = store.snapshot()?;
    let records: Vec<&NetworkRecord> = snapshot.records.iter().filter(|r| query.matches(r)).collect();

    match output_mode(cli) {
        OutputMode::Human => {
            if records.is_empty() {
                println!("No stored networks match.");
            } else {
                println!(
                    "{:<32}  {:<17}  {:>5}  {:>5}  {}",
                    "SSID", "BSSID", "RSSI", "FREQ", "LABEL"
                );
                println!("{}", "-".repeat(75));
                for record in &records {
                    println!("{}", record_row(record));
                }
                println!("\n{} of {} stored networks", records.len(), snapshot.records.len());
            }
            if !snapshot.skipped.is_empty() {
                println!(
                    "{}",
                    format!("{} malformed lines skipped", snapshot.skipped.len()).yellow()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "dataset": config.paths.dataset.to_string_lossy(),
                "total": snapshot.records.len(),
                "matched": records.len(),
                "skipped_lines": snapshot.skipped.len(),
                "records": serde_json::to_value(&records)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_delete(cli: &Cli, args: &DeleteArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = NetworkStore::open(&config.paths.dataset);
    if !store.delete_one(&args.ssid, &args.bssid)? {
        return Err(CliError::User(format!(
            "no stored network {}:{}",
            args.ssid, args.bssid
        )));
    }
    log_activity(
        &config,
        ActivityEvent::StoreRewritten {
            operation: "delete",
            records: 1,
        },
    );

    match output_mode(cli) {
        OutputMode::Human => println!("Deleted {} ({})", args.ssid, args.bssid),
        OutputMode::Json => write_json_line(&json!({
            "command": "delete",
            "ssid": args.ssid,
            "bssid": args.bssid,
            "deleted": true,
        }))?,
    }
    Ok(())
}

fn run_clear(cli: &Cli, args: &ClearArgs) -> Result<(), CliError> {
    if !args.yes {
        return Err(CliError::User(
            "refusing to delete every stored network without --yes".to_string(),
        ));
    }
    let config = load_config(cli)?;
    let removed = NetworkStore::open(&config.paths.dataset).clear_all()?;
    log_activity(
        &config,
        ActivityEvent::StoreRewritten {
            operation: "clear",
            records: removed,
        },
    );

    match output_mode(cli) {
        OutputMode::Human => println!("Removed {removed} stored networks."),
        OutputMode::Json => write_json_line(&json!({
            "command": "clear",
            "removed": removed,
        }))?,
    }
    Ok(())
}

fn run_export(cli: &Cli, args: &ExportArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let query = StoreQuery {
        ssid_contains: args.ssid.clone(),
        label: parse_label(args.label.as_deref())?,
    };
    let records = NetworkStore::open(&config.paths.dataset).query(&query)?;
    let written = export_json(&records, &args.path)?;

    match output_mode(cli) {
        OutputMode::Human => println!("Exported {written} networks to {}", args.path.display()),
        OutputMode::Json => write_json_line(&json!({
            "command": "export",
            "path": args.path.to_string_lossy(),
            "records": written,
        }))?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// classify / settings / config
// ---------------------------------------------------------------------------

fn run_classify(cli: &Cli, args: &ClassifyArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let classifier = build_classifier(&config.classifier);
    let obs = NetworkObservation::now(
        args.ssid.clone(),
        "",
        args.rssi,
        args.frequency,
        args.capabilities.clone(),
    );
    let label = classifier.classify(&ClassifierInput::from_observation(&obs));
    let rule_label = label_for_capabilities(&obs.capabilities);
    let features = extract_observation(&obs);
    classifier.shutdown();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Label: {} (via {})", colored_label(label), classifier.name());
            if rule_label != label {
                println!("  Rules alone would say {}", colored_label(rule_label));
            }
            println!("Features:");
            for (name, value) in features.named() {
                println!("  {name:<16} {value}");
            }
        }
        OutputMode::Json => {
            let named: serde_json::Map<String, Value> = features
                .named()
                .map(|(name, value)| (name.to_string(), json!(value)))
                .collect();
            write_json_line(&json!({
                "command": "classify",
                "capabilities": args.capabilities,
                "classifier": classifier.name(),
                "label": label,
                "rule_label": rule_label,
                "failures": classifier.failure_count(),
                "features": named,
            }))?;
        }
    }
    Ok(())
}

fn print_settings(settings: &Settings) {
    for key in SettingKey::ALL {
        let state = if settings.get(key) {
            "on".green()
        } else {
            "off".dimmed()
        };
        println!("  {:<14} {state}", key.as_str());
    }
}

fn run_settings(cli: &Cli, args: &SettingsArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let source = FileSettingsSource::new(&config.paths.settings_file);

    match &args.command {
        None | Some(SettingsCommand::Show) => {
            let settings = source.fetch()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Settings ({}):", source.path().display());
                    print_settings(&settings);
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "settings show",
                    "path": source.path().to_string_lossy(),
                    "settings": serde_json::to_value(settings)?,
                }))?,
            }
        }
        Some(SettingsCommand::Set { key, value }) => {
            let key: SettingKey = key.parse()?;
            let value = parse_switch(value)?;
            let settings = source.update(key, value)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Updated {}.", key.as_str());
                    print_settings(&settings);
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "settings set",
                    "key": key.as_str(),
                    "value": value,
                    "settings": serde_json::to_value(settings)?,
                }))?,
            }
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match load_config(cli) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// status / bluetooth
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
struct CycleTotals {
    cycles: i64,
    persisted: i64,
    dangerous: i64,
}

fn cycle_totals_last_day(config: &Config) -> Option<CycleTotals> {
    if !config.paths.sqlite_db.exists() {
        return None;
    }
    let since = (chrono::Utc::now() - chrono::Duration::hours(24))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    SqliteLogger::open(&config.paths.sqlite_db)
        .and_then(|db| db.cycle_totals_since(&since))
        .map(|(cycles, persisted, dangerous)| CycleTotals {
            cycles,
            persisted,
            dangerous,
        })
        .map_err(|e| eprintln!("[WSN-STORE] activity database unreadable: {e}"))
        .ok()
}

fn run_status(cli: &Cli, _args: &StatusArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let version = env!("CARGO_PKG_VERSION");
    let settings = FileSettingsSource::new(&config.paths.settings_file).fetch()?;
    let state = JobState::load_or_default(&config.paths.state_file);
    let snapshot = NetworkStore::open(&config.paths.dataset).snapshot()?;
    let by_label: Vec<(RiskLabel, usize)> = RiskLabel::ALL
        .into_iter()
        .map(|label| (label, snapshot.records.iter().filter(|r| r.label == label).count()))
        .collect();
    let totals = cycle_totals_last_day(&config);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("WiFi Sentinel v{version}");
            println!("  Config: {}", config.paths.config_file.display());
            println!("  Source: {}", config.scanner.source);

            println!("\nSettings:");
            print_settings(&settings);

            println!("\nJob:");
            match &state.last_run {
                Some(at) => println!(
                    "  Last run: {} ({}{})",
                    at.format("%Y-%m-%d %H:%M:%S"),
                    state.last_outcome.as_deref().unwrap_or("unknown"),
                    state
                        .last_reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                ),
                None => println!("  Last run: never"),
            }
            println!(
                "  Runs: {}  Successes: {}  Retries: {} ({} in a row)",
                state.total_runs,
                state.total_successes,
                state.total_retries,
                state.consecutive_retries
            );
            println!(
                "  Persisted: {}  Alerts: {}",
                state.total_persisted, state.total_alerts
            );

            println!("\nDataset ({}):", config.paths.dataset.display());
            println!("  Networks: {}", snapshot.records.len());
            for (label, count) in &by_label {
                println!("  {:<10} {count}", colored_label(*label));
            }
            if !snapshot.skipped.is_empty() {
                println!("  Malformed lines: {}", snapshot.skipped.len());
            }

            if let Some(totals) = &totals {
                println!("\nLast 24h:");
                println!(
                    "  Cycles: {}  New networks: {}  Dangerous sightings: {}",
                    totals.cycles, totals.persisted, totals.dangerous
                );
            }
        }
        OutputMode::Json => {
            let labels: serde_json::Map<String, Value> = by_label
                .iter()
                .map(|(label, count)| (label.as_str().to_string(), json!(count)))
                .collect();
            let payload = json!({
                "command": "status",
                "version": version,
                "config_path": config.paths.config_file.to_string_lossy(),
                "source": config.scanner.source,
                "settings": serde_json::to_value(settings)?,
                "job": serde_json::to_value(&state)?,
                "dataset": {
                    "path": config.paths.dataset.to_string_lossy(),
                    "records": snapshot.records.len(),
                    "by_label": labels,
                    "skipped_lines": snapshot.skipped.len(),
                },
                "last_24h": serde_json::to_value(&totals)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_bluetooth(cli: &Cli, _args: &BluetoothArgs) -> Result<(), CliError> {
    let table = discover_with_bluetoothctl()?;
    let devices = table.devices();

    match output_mode(cli) {
        OutputMode::Human => {
            if devices.is_empty() {
                println!("No Bluetooth devices known to bluetoothctl.");
            }
            for device in &devices {
                let rssi = device
                    .rssi
                    .map_or_else(|| "-".to_string(), |r| format!("{r} dBm"));
                println!("  {:<17}  {:<28}  {rssi}", device.address, truncate(&device.name, 28));
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "bluetooth",
            "devices": serde_json::to_value(&devices)?,
        }))?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// output plumbing
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("WSN_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "wsn",
            "--config",
            "/tmp/wsn.toml",
            "--json",
            "--no-color",
            "--source",
            "replay:/tmp/scan.json",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["wsn", "status", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["wsn", "daemon", "--run-immediately"],
            vec!["wsn", "job"],
            vec!["wsn", "watch", "--cycles", "3"],
            vec!["wsn", "list", "--ssid", "cafe", "--label", "dangerous"],
            vec!["wsn", "delete", "Cafe", "00:11:22:33:44:55"],
            vec!["wsn", "clear", "--yes"],
            vec!["wsn", "export", "/tmp/out.json", "--label", "safe"],
            vec!["wsn", "classify", "[WPA2-PSK-CCMP][ESS]", "--rssi", "-72"],
            vec!["wsn", "settings", "show"],
            vec!["wsn", "settings", "set", "auto_scan", "on"],
            vec!["wsn", "config", "validate"],
            vec!["wsn", "bluetooth"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn delete_needs_ssid_and_bssid() {
        assert!(Cli::try_parse_from(["wsn", "delete", "Cafe"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["wsn", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_prefers_flag_then_env_then_tty() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some(" Human "), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("yaml"), false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User("x".into()).exit_code(), 1);
        assert_eq!(CliError::Runtime("x".into()).exit_code(), 2);
        assert_eq!(CliError::Retry("x".into()).exit_code(), 75);
    }

    #[test]
    fn config_errors_are_user_errors() {
        let err: CliError = WsnError::InvalidConfig {
            details: "bad".into(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        let err: CliError = WsnError::Runtime {
            details: "boom".into(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn label_filter_parsing() {
        assert_eq!(parse_label(None).unwrap(), None);
        assert_eq!(
            parse_label(Some("dangerous")).unwrap(),
            Some(RiskLabel::Dangerous)
        );
        assert!(parse_label(Some("scary")).is_err());
    }

    #[test]
    fn truncate_keeps_short_names() {
        assert_eq!(truncate("Cafe", 8), "Cafe");
        assert_eq!(truncate("VeryLongNetworkName", 8).chars().count(), 8);
    }
}
