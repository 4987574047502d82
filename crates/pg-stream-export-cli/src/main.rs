//! pg-stream-export CLI - stream a PostgreSQL query result to a file.

use clap::{Parser, Subcommand};
use pg_stream_export::pipeline::CANCELLED_EXIT_CODE;
use pg_stream_export::{run_export, Config, ExportError, PgPool, RunReport};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-stream-export")]
#[command(about = "Stream a PostgreSQL query result to a file in bounded memory")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one export
    Run {
        /// Override output file path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override rows fetched per round trip
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override batches fetched ahead of the sink (0-4)
        #[arg(long)]
        read_ahead: Option<usize>,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ExportError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            output,
            batch_size,
            read_ahead,
        } => {
            // Apply overrides
            if let Some(path) = output {
                config.output.path = path.display().to_string();
            }
            if let Some(size) = batch_size {
                config.query.batch_size = size;
            }
            if let Some(n) = read_ahead {
                config.pipeline.read_ahead = n;
            }
            config.validate()?;

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler()?;

            let run = run_export(&config, &cancel_token);
            let report =
                match run_with_deadline(run, cancel_token.clone(), cli.shutdown_timeout).await {
                    Some(result) => result?,
                    None => {
                        eprintln!(
                            "Shutdown timeout of {}s elapsed; output is incomplete",
                            cli.shutdown_timeout
                        );
                        return Ok(ExitCode::from(CANCELLED_EXIT_CODE));
                    }
                };

            print_report(&report, cli.output_json)?;
            Ok(ExitCode::from(report.exit_code()))
        }

        Commands::HealthCheck => {
            let pool = PgPool::new(&config.source)?;
            let latency = pool.health_check().await;
            pool.close();

            match latency {
                Ok(latency) => {
                    if cli.output_json {
                        let result = serde_json::json!({
                            "healthy": true,
                            "target": pool.target(),
                            "latency_ms": latency.as_millis() as u64,
                        });
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!("Health Check Results:");
                        println!(
                            "  Source (PostgreSQL): OK ({}ms)",
                            latency.as_millis()
                        );
                        println!("\n  Overall: HEALTHY");
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    if cli.output_json {
                        let result = serde_json::json!({
                            "healthy": false,
                            "target": pool.target(),
                            "error": e.to_string(),
                        });
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    }
                    Err(e)
                }
            }
        }
    }
}

fn print_report(report: &RunReport, output_json: bool) -> Result<(), ExportError> {
    if output_json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let status_msg = if report.is_completed() {
        "Export completed!"
    } else if report.is_cancelled() {
        "Export cancelled."
    } else {
        "Export failed."
    };
    println!("\n{}", status_msg);
    println!("  Output: {}", report.output);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Rows: {}", report.records);
    println!("  Bytes: {}", report.bytes);
    println!("  Throughput: {:.0} rows/sec", report.rows_per_second);
    if !report.output_complete {
        println!("  Output is incomplete");
    }
    if let Some(e) = report.failure() {
        eprintln!("{}", e.format_detailed());
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Drive `run` to completion unless it is still going `timeout_secs` after
/// the token is cancelled, in which case it is dropped and `None` returned.
async fn run_with_deadline<F: Future>(
    run: F,
    cancel_token: CancellationToken,
    timeout_secs: u64,
) -> Option<F::Output> {
    tokio::select! {
        output = run => Some(output),
        _ = shutdown_deadline(cancel_token, timeout_secs) => None,
    }
}

/// Resolves `timeout_secs` after the token is cancelled.
async fn shutdown_deadline(cancel_token: CancellationToken, timeout_secs: u64) {
    cancel_token.cancelled().await;
    tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
    warn!("Graceful shutdown did not finish within {}s", timeout_secs);
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, ExportError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Shutting down gracefully...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, ExportError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
    });

    Ok(cancel_token)
}
