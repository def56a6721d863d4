//! Vitals CLI - Command-line interface for Vitals Board
//!
//! Commands:
//! - serve: Run the ingestion server, optionally with an in-process display
//! - watch: Run the terminal display against a remote server
//! - normalize: Print the normalized view model for a raw snapshot
//! - validate: Validate an ingestion batch

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vitals_board::config::Transport;
use vitals_board::display::Board;
use vitals_board::{
    DisplayClient, DisplayState, IngestBatch, InMemorySnapshotStore, LiveChannel, LocalChannel,
    Normalizer, PollingChannel, SnapshotStore, SseChannel, VitalsConfig, VitalsError,
    VITALS_VERSION,
};

/// Vitals - Live health vitals board
#[derive(Parser)]
#[command(name = "vitals")]
#[command(version = VITALS_VERSION)]
#[command(about = "Ingest health vitals and display them with change highlighting", long_about = None)]
struct Cli {
    /// Config file (defaults to config/vitals.toml or vitals.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Also run a display on this terminal
        #[arg(long)]
        display: bool,
    },

    /// Run the display against a remote server
    Watch {
        /// Server host and port
        #[arg(long)]
        host: Option<String>,

        /// URL scheme (http or https)
        #[arg(long)]
        scheme: Option<String>,

        /// How snapshots are received
        #[arg(long, value_enum)]
        transport: Option<TransportArg>,

        /// Highlight duration in milliseconds
        #[arg(long)]
        flash_ms: Option<u64>,
    },

    /// Print the normalized view model for a raw snapshot
    Normalize {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Validate an ingestion batch
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    /// Server-sent events
    Sse,
    /// Periodic fetch of /values
    Poll,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Sse => Transport::Sse,
            TransportArg::Poll => Transport::Poll,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), VitalsCliError> {
    let config = match &cli.config {
        Some(path) => VitalsConfig::load(path)?,
        None => VitalsConfig::load_or_default(),
    };
    init_logging(&config.logging.level);

    match cli.command {
        Commands::Serve { bind, display } => cmd_serve(config, bind, display).await,

        Commands::Watch {
            host,
            scheme,
            transport,
            flash_ms,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.display.host = host;
            }
            if let Some(scheme) = scheme {
                config.display.scheme = scheme;
            }
            if let Some(transport) = transport {
                config.display.transport = transport.into();
            }
            if let Some(flash_ms) = flash_ms {
                config.display.flash_duration_ms = flash_ms;
            }
            config.display.validate()?;
            cmd_watch(config).await
        }

        Commands::Normalize { input } => cmd_normalize(&input),

        Commands::Validate { input, json } => cmd_validate(&input, json),
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

async fn cmd_serve(
    config: VitalsConfig,
    bind: Option<String>,
    display: bool,
) -> Result<(), VitalsCliError> {
    let addr = bind.unwrap_or(config.server.bind);
    let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::default());
    let server = vitals_board::server::bind_and_serve(&addr, store.clone());

    if display {
        let channel = LocalChannel::new(store);
        let flash = config.display.flash_duration();
        tokio::select! {
            result = server => result?,
            result = run_display(channel, flash) => result?,
            _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
        }
    } else {
        tokio::select! {
            result = server => result?,
            _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
        }
    }
    Ok(())
}

async fn cmd_watch(config: VitalsConfig) -> Result<(), VitalsCliError> {
    let flash = config.display.flash_duration();
    let display = async {
        match config.display.transport {
            Transport::Sse => run_display(SseChannel::new(config.display.updates_url()), flash).await,
            Transport::Poll => {
                let channel =
                    PollingChannel::new(config.display.values_url(), config.display.poll_interval());
                run_display(channel, flash).await
            }
        }
    };

    tokio::select! {
        result = display => result?,
        _ = tokio::signal::ctrl_c() => log::info!("display stopped"),
    }
    Ok(())
}

async fn run_display<C: LiveChannel>(channel: C, flash: Duration) -> Result<(), VitalsError> {
    let mut client = DisplayClient::new(channel, flash);
    let highlight = atty::is(atty::Stream::Stdout);
    client
        .run(|state| {
            if let Err(e) = draw(state, highlight) {
                log::warn!("failed to draw board: {}", e);
            }
        })
        .await
}

fn draw(state: &DisplayState, highlight: bool) -> io::Result<()> {
    let board = state.render_board(Utc::now());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if highlight {
        // Clear and redraw in place, reverse video for changed rows
        write!(out, "\x1b[2J\x1b[H")?;
        write_highlighted(&mut out, &board)?;
    } else {
        writeln!(out, "{}", board)?;
    }
    out.flush()
}

fn write_highlighted(out: &mut impl Write, board: &Board) -> io::Result<()> {
    for row in &board.rows {
        if row.flashing {
            writeln!(out, "\x1b[7m  {:<24}{}\x1b[0m", row.label, row.text)?;
        } else {
            writeln!(out, "  {:<24}{}", row.label, row.text)?;
        }
    }
    writeln!(
        out,
        "  Last recorded: {}",
        board.last_recorded.as_deref().unwrap_or("never")
    )?;
    if let Some(error) = &board.error {
        writeln!(out, "\x1b[31m  Error: {}\x1b[0m", error)?;
    }
    Ok(())
}

fn read_input(input: &PathBuf) -> Result<String, VitalsCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_normalize(input: &PathBuf) -> Result<(), VitalsCliError> {
    let data = read_input(input)?;
    let view_model = Normalizer::normalize_json(&data)?;
    println!("{}", serde_json::to_string_pretty(&view_model)?);
    Ok(())
}

fn cmd_validate(input: &PathBuf, json: bool) -> Result<(), VitalsCliError> {
    let data = read_input(input)?;
    let batch = IngestBatch::from_json(&data)?;
    let errors: Vec<String> = batch.validation_errors().iter().map(|e| e.to_string()).collect();

    let report = ValidationReport {
        attributes: batch.attributes.len(),
        measurements: batch.measurements.len(),
        invalid_entries: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Attributes:      {}", report.attributes);
        println!("Measurements:    {}", report.measurements);
        println!("Invalid entries: {}", report.invalid_entries);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {}", err);
            }
        }
    }

    if report.invalid_entries > 0 {
        Err(VitalsCliError::ValidationFailed(report.invalid_entries))
    } else {
        Ok(())
    }
}

// Error handling

#[derive(Debug)]
enum VitalsCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Vitals(VitalsError),
    ValidationFailed(usize),
}

impl From<io::Error> for VitalsCliError {
    fn from(e: io::Error) -> Self {
        VitalsCliError::Io(e)
    }
}

impl From<serde_json::Error> for VitalsCliError {
    fn from(e: serde_json::Error) -> Self {
        VitalsCliError::Json(e)
    }
}

impl From<VitalsError> for VitalsCliError {
    fn from(e: VitalsError) -> Self {
        VitalsCliError::Vitals(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VitalsCliError> for CliError {
    fn from(e: VitalsCliError) -> Self {
        match e {
            VitalsCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VitalsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VitalsCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} entries failed validation", count),
                hint: Some("Every entry needs a non-empty type".to_string()),
            },
            VitalsCliError::Vitals(e) => {
                let (code, hint) = match &e {
                    VitalsError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                    VitalsError::Validation(_) => {
                        ("VALIDATION_ERROR", "Run 'vitals validate' for details")
                    }
                    VitalsError::Channel(_) | VitalsError::Http(_) => {
                        ("CONNECTION_ERROR", "Check that the server is running and reachable")
                    }
                    VitalsError::Io(_) => ("IO_ERROR", "Check the bind address and permissions"),
                    VitalsError::Config(_) => ("CONFIG_ERROR", "Check the config file"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    attributes: usize,
    measurements: usize,
    invalid_entries: usize,
    errors: Vec<String>,
}
