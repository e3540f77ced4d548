use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use flowtap_core::{
    CaptureBackend, CaptureError, Engine, EngineConfig, EngineError, JsonLinesSink, ReplayBackend,
    StatisticsSnapshot,
};
#[cfg(feature = "live")]
use flowtap_core::{InterfaceInfo, LiveBackend, LiveOptions, auto_select};
use glob::glob;
#[cfg(feature = "live")]
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STDOUT_PATH: &str = "-";
const WAIT_TICK: Duration = Duration::from_millis(50);

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("FLOWTAP_BUILD_COMMIT"),
    ", built ",
    env!("FLOWTAP_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "flowtap")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Live packet capture with bidirectional flow tracking.",
    long_about = None,
    after_help = "Examples:\n  flowtap interfaces\n  flowtap capture -i eth0 --flows flows.jsonl\n  flowtap replay capture.pcapng --packets - --stats stats.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List capture-capable interfaces; `*` marks the one `auto` selects.
    #[cfg(feature = "live")]
    Interfaces {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture live traffic until Ctrl-C or the duration elapses.
    #[cfg(feature = "live")]
    #[command(
        after_help = "Examples:\n  flowtap capture\n  flowtap capture -i eth0 -f \"tcp port 443\" --duration 60 --flows -"
    )]
    Capture {
        /// Interface name, or `auto`
        #[arg(short = 'i', long, default_value = flowtap_core::AUTO_INTERFACE)]
        interface: String,

        /// Capture filter expression (BPF syntax)
        #[arg(short = 'f', long)]
        filter: Option<String>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Replay a .pcap or .pcapng file through the capture pipeline.
    #[command(
        after_help = "Examples:\n  flowtap replay capture.pcapng\n  flowtap replay 'captures/*.pcapng' --packets packets.jsonl --flows -"
    )]
    Replay {
        /// Path (or glob matching one file) of a .pcap or .pcapng file
        input: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Write decoded packets as JSON lines (`-` for stdout)
    #[arg(long, value_name = "PATH")]
    packets: Option<PathBuf>,

    /// Write finished flows as JSON lines (`-` for stdout; default when no output is given)
    #[arg(long, value_name = "PATH")]
    flows: Option<PathBuf>,

    /// Write final statistics as JSON
    #[arg(long, value_name = "PATH")]
    stats: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Idle seconds before a flow is evicted
    #[arg(long, value_name = "SECS")]
    flow_timeout: Option<u64>,

    /// Frames buffered between capture and decode
    #[arg(long, value_name = "N")]
    queue_capacity: Option<usize>,

    /// Log statistics every SECS seconds while running
    #[arg(long, value_name = "SECS")]
    stats_interval: Option<u64>,

    /// Increase log verbosity
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        #[cfg(feature = "live")]
        Commands::Interfaces { json } => {
            init_logging(0, false);
            cmd_interfaces(json)
        }
        #[cfg(feature = "live")]
        Commands::Capture {
            interface,
            filter,
            duration,
            run,
        } => {
            init_logging(run.verbose, run.quiet);
            cmd_capture(interface, filter, duration, run)
        }
        Commands::Replay { input, run } => {
            init_logging(run.verbose, run.quiet);
            cmd_replay(input, run)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{:#}", err), None)
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::Capture(CaptureError::Permission { .. }) => {
                Some("run as root or grant CAP_NET_RAW and CAP_NET_ADMIN".to_string())
            }
            EngineError::Capture(CaptureError::Interface { .. })
            | EngineError::Capture(CaptureError::NoInterfaces) => {
                Some("run `flowtap interfaces` to list capture devices".to_string())
            }
            EngineError::Capture(CaptureError::Filter { .. }) => {
                Some("check the filter expression (BPF syntax)".to_string())
            }
            EngineError::Config(_) => {
                Some("adjust --config, --flow-timeout or --queue-capacity".to_string())
            }
            EngineError::ShutdownTimeout { .. } | EngineError::WorkerPanicked { .. } => {
                Some("results may be incomplete".to_string())
            }
            _ => None,
        };
        CliError::new(err.to_string(), hint)
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("flowtap={default_level},flowtap_core={default_level}"))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(feature = "live")]
#[derive(Serialize)]
struct InterfaceEntry<'a> {
    #[serde(flatten)]
    info: &'a InterfaceInfo,
    auto: bool,
}

#[cfg(feature = "live")]
fn cmd_interfaces(json: bool) -> Result<(), CliError> {
    let backend = LiveBackend::default();
    let interfaces = backend.interfaces().map_err(EngineError::from)?;
    let auto_name = auto_select(&interfaces).ok().map(|iface| iface.name.clone());

    let entries: Vec<InterfaceEntry<'_>> = interfaces
        .iter()
        .map(|info| InterfaceEntry {
            info,
            auto: auto_name.as_deref() == Some(info.name.as_str()),
        })
        .collect();

    if json {
        let text =
            serde_json::to_string_pretty(&entries).context("JSON serialization failed")?;
        println!("{}", text);
        return Ok(());
    }

    for entry in entries {
        let marker = if entry.auto { "*" } else { " " };
        let mut flags = Vec::new();
        flags.push(if entry.info.is_up { "up" } else { "down" });
        if entry.info.is_loopback {
            flags.push("loopback");
        }
        let addresses = entry
            .info
            .addresses
            .iter()
            .map(|addr| addr.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{} {:<16} [{}] {}",
            marker,
            entry.info.name,
            flags.join(","),
            addresses
        );
    }
    Ok(())
}

#[cfg(feature = "live")]
fn cmd_capture(
    interface: String,
    filter: Option<String>,
    duration: Option<u64>,
    run: RunArgs,
) -> Result<(), CliError> {
    let config = load_config(&run)?;
    let options = LiveOptions {
        read_timeout_ms: i32::try_from(config.poll_interval_ms).unwrap_or(i32::MAX),
        ..LiveOptions::default()
    };
    let backend: Arc<dyn CaptureBackend> = Arc::new(LiveBackend::new(options));
    let limit = duration.map(Duration::from_secs);
    run_pipeline(config, backend, &interface, filter.as_deref(), limit, &run)
}

fn cmd_replay(input: PathBuf, run: RunArgs) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&input)?;
    validate_input_file(&resolved_input)?;
    let config = load_config(&run)?;
    let backend: Arc<dyn CaptureBackend> = Arc::new(ReplayBackend::new(&resolved_input));
    run_pipeline(
        config,
        backend,
        flowtap_core::AUTO_INTERFACE,
        None,
        None,
        &run,
    )
}

fn load_config(run: &RunArgs) -> Result<EngineConfig, CliError> {
    let mut config = match run.config.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config file: {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(secs) = run.flow_timeout {
        config.flow_timeout_secs = secs;
    }
    if let Some(capacity) = run.queue_capacity {
        config.queue_capacity = capacity;
    }
    if run.packets.is_none() {
        config.persist_packets = false;
    }
    config.validate().map_err(EngineError::from)?;
    Ok(config)
}

fn run_pipeline(
    config: EngineConfig,
    backend: Arc<dyn CaptureBackend>,
    interface: &str,
    filter: Option<&str>,
    limit: Option<Duration>,
    run: &RunArgs,
) -> Result<(), CliError> {
    let sink = build_sink(run)?;
    let engine = Engine::new(config, backend, Box::new(sink));

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    let name = engine.start(interface, filter)?;
    if !run.quiet {
        eprintln!("capturing on {} (Ctrl-C to stop)", name);
    }

    let started = Instant::now();
    let report_every = run.stats_interval.filter(|secs| *secs > 0).map(Duration::from_secs);
    let mut next_report = report_every.map(|every| started + every);

    loop {
        if interrupted.load(Ordering::SeqCst) {
            info!("interrupted, stopping capture");
            break;
        }
        if engine.is_source_exhausted() {
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("capture duration reached");
            break;
        }
        if let (Some(every), Some(due)) = (report_every, next_report) {
            if Instant::now() >= due {
                log_statistics(&engine.statistics());
                next_report = Some(due + every);
            }
        }
        thread::sleep(WAIT_TICK);
    }

    engine.stop()?;
    let stats = engine.statistics();
    if stats.dropped > 0 {
        warn!(dropped = stats.dropped, "frames were dropped because the queue was full");
    }
    if let Some(path) = run.stats.as_ref() {
        write_stats(path, &stats)?;
    }
    if !run.quiet {
        eprintln!(
            "OK: {} captured, {} processed, {} dropped in {:.1}s",
            stats.captured, stats.processed, stats.dropped, stats.elapsed_seconds
        );
    }
    Ok(())
}

fn log_statistics(stats: &StatisticsSnapshot) {
    info!(
        captured = stats.captured,
        processed = stats.processed,
        dropped = stats.dropped,
        queue_depth = stats.queue_depth,
        active_flows = stats.active_flows,
        pps = format_args!("{:.1}", stats.packets_per_second),
        "statistics"
    );
}

fn build_sink(run: &RunArgs) -> Result<JsonLinesSink, CliError> {
    let packets_to_stdout = run.packets.as_deref().is_some_and(is_stdout);
    let flows_to_stdout = run.flows.as_deref().is_some_and(is_stdout);
    if packets_to_stdout && flows_to_stdout {
        return Err(CliError::new(
            "cannot write both packets and flows to stdout",
            Some("send one of --packets/--flows to a file".to_string()),
        ));
    }

    let packets = run.packets.as_deref().map(open_output).transpose()?;
    let flows = match run.flows.as_deref() {
        Some(path) => Some(open_output(path)?),
        None if run.packets.is_none() => Some(open_output(Path::new(STDOUT_PATH))?),
        None => None,
    };
    Ok(JsonLinesSink::new(packets, flows))
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == STDOUT_PATH
}

fn open_output(path: &Path) -> Result<Box<dyn Write + Send>, CliError> {
    if is_stdout(path) {
        return Ok(Box::new(io::stdout()));
    }
    ensure_parent_dir(path)?;
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(Box::new(file))
}

fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn write_stats(path: &Path, stats: &StatisticsSnapshot) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(stats).context("JSON serialization failed")?;
    ensure_parent_dir(path)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write statistics: {}", path.display()))?;
    Ok(())
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let mut matches = Vec::new();
    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        ));
    }
    if matches.len() > 1 {
        let listed = matches
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let more = if matches.len() > 3 { ", ..." } else { "" };
        return Err(CliError::new(
            format!(
                "multiple files match pattern '{}' ({} matches); matches: {}{}",
                pattern,
                matches.len(),
                listed,
                more
            ),
            Some("pass a single capture file, or run once per file".to_string()),
        ));
    }

    Ok(matches.remove(0))
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
