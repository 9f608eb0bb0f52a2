//! trax - command-line driver for the audio-separation service
//!
//! One subcommand per remote operation, plus `workflow` which chains the
//! full upload → pre-analysis → configuration → separation → download
//! pipeline, and two local helpers (`merge`, `pitch-csv`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trax_client::models::DownloadOutcome;
use trax_client::{
    Algorithm, JobPoller, Params, PollerConfig, ResourceKind, TraxClient, WorkflowConfig,
    WorkflowOrchestrator,
};
use trax_common::config::{self, ClientConfig, TomlConfig};
use trax_common::events::{EventBus, TraxEvent};
use trax_common::{annotation, fileutil};

/// Command-line arguments for trax
#[derive(Parser, Debug)]
#[command(name = "trax")]
#[command(about = "Client for the Audionamix audio-separation API")]
#[command(version)]
struct Args {
    /// TOML config file (defaults to <config_dir>/trax/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API access key
    #[arg(long, global = true, env = config::ACCESS_KEY_ENV, hide_env_values = true)]
    access_key: Option<String>,

    /// API access secret
    #[arg(long, global = true, env = config::SECRET_ENV, hide_env_values = true)]
    secret: Option<String>,

    /// Service host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Service port (scheme default when omitted)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Use plain http instead of https
    #[arg(long, global = true)]
    insecure: bool,

    /// Idle timeout in seconds (no bytes moving)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Extra query parameter, repeatable (key=value); overrides operation defaults
    #[arg(long = "param", global = true, value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Log resolved request URLs and headers
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an audio file
    Upload { path: PathBuf },

    /// Start a pre-analysis job
    Preanalysis {
        file_id: u64,
        /// pitch or csnt
        #[arg(default_value = "pitch")]
        algo: Algorithm,
        #[arg(long)]
        baseline: Option<String>,
    },

    /// Start a separation job
    Separation {
        file_id: u64,
        #[arg(long)]
        config_id: Option<u64>,
    },

    /// Show one audio file, or list all
    Files { file_id: Option<u64> },

    /// Show job status, optionally polling until finished
    Status {
        id: u64,
        /// preanalysis or separation
        #[arg(long, default_value = "separation")]
        kind: ResourceKind,
        /// Poll until the job finishes
        #[arg(long)]
        watch: bool,
        /// Polling interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Download an audio file (e.g. the extracted result)
    Download { pk: u64, dest: Option<PathBuf> },

    /// Download the annotation artifact of a finished pre-analysis
    Annotation { id: u64, dest: Option<PathBuf> },

    /// Upload a JSON configuration file
    Configuration { path: PathBuf },

    /// Merge two annotation artifacts; keys of the second win
    Merge {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },

    /// Export the pitch annotation of an artifact as CSV
    PitchCsv {
        artifact: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the full separation workflow for an audio file
    Workflow {
        path: PathBuf,
        /// Polling interval in seconds
        interval: Option<u64>,
        /// Directory for artifacts and the extracted audio
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
        #[arg(long)]
        baseline: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(args.debug, &toml);

    match &args.command {
        Command::Merge {
            first,
            second,
            output,
        } => {
            annotation::merge_files(first, second, output)
                .await
                .context("Merge failed")?;
            println!("{}", output.display());
            return Ok(());
        }
        Command::PitchCsv { artifact, output } => {
            let value: serde_json::Value =
                fileutil::read_json(artifact).context("Failed to read artifact")?;
            let rows = match output {
                Some(path) => {
                    let file = std::fs::File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    annotation::pitch_to_csv(&value, io::BufWriter::new(file))?
                }
                None => annotation::pitch_to_csv(&value, io::stdout().lock())?,
            };
            info!(rows = rows, "Pitch annotation exported");
            return Ok(());
        }
        _ => {}
    }

    let client = Arc::new(build_client(&args, &toml)?);
    let params: Params = args.params.iter().cloned().collect();

    match args.command {
        Command::Upload { path } => {
            info!("Uploading {}", path.display());
            print_json(&client.upload(&path, &params).await?)?;
        }
        Command::Preanalysis {
            file_id,
            algo,
            baseline,
        } => {
            let job = client
                .preanalysis(file_id, algo, baseline.as_deref(), &params)
                .await?;
            print_json(&job)?;
        }
        Command::Separation { file_id, config_id } => {
            print_json(&client.separation(file_id, config_id, &params).await?)?;
        }
        Command::Files { file_id } => {
            print_json(&client.files(file_id, &params).await?)?;
        }
        Command::Status {
            id,
            kind,
            watch,
            interval,
        } => {
            if watch {
                let events = EventBus::new(64);
                spawn_event_printer(&events);
                let cancel = cancel_on_ctrl_c();
                let poller = JobPoller::new(client.clone(), poller_config(interval, &toml))
                    .with_events(events)
                    .with_cancellation(cancel);
                println!("To stop press Ctrl-C");
                print_json(&poller.poll(kind, id).await?)?;
            } else {
                print_json(&client.status(kind, id, &params).await?)?;
            }
        }
        Command::Download { pk, dest } => {
            let dest = dest.unwrap_or_else(|| PathBuf::from(format!("sample_extracted_{}.wav", pk)));
            report_download(client.download(pk, &dest, &params).await?)?;
        }
        Command::Annotation { id, dest } => {
            let dest = dest.unwrap_or_else(|| PathBuf::from(format!("annotation_{}.json", id)));
            report_download(client.annotation(id, &dest, &params).await?)?;
        }
        Command::Configuration { path } => {
            print_json(&client.configuration_from_file(&path, &params).await?)?;
        }
        Command::Workflow {
            path,
            interval,
            work_dir,
            baseline,
        } => {
            run_workflow(client, &toml, &path, interval, work_dir, baseline).await?;
        }
        Command::Merge { .. } | Command::PitchCsv { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_workflow(
    client: Arc<TraxClient>,
    toml: &TomlConfig,
    path: &Path,
    interval: Option<u64>,
    work_dir: PathBuf,
    baseline: Option<String>,
) -> Result<()> {
    let poller = poller_config(interval, toml);
    println!(
        "check status every {} secs. To stop press Ctrl-C",
        poller.interval.as_secs_f64()
    );

    let events = EventBus::new(256);
    spawn_event_printer(&events);

    let orchestrator = WorkflowOrchestrator::new(
        client,
        WorkflowConfig {
            work_dir,
            poller,
            baseline,
        },
    )
    .with_events(events)
    .with_cancellation(cancel_on_ctrl_c());

    let report = orchestrator
        .run(path)
        .await
        .context("Workflow failed")?;

    println!(
        "extracted audio {} ({} bytes) from separation {}",
        report.output.display(),
        report.output_bytes,
        report.separation.id
    );
    Ok(())
}

fn build_client(args: &Args, toml: &TomlConfig) -> Result<TraxClient> {
    let credentials =
        config::resolve_credentials(args.access_key.as_deref(), args.secret.as_deref(), toml)?;

    let mut client_config = ClientConfig::from_toml(credentials, toml).with_debug(args.debug);
    if let Some(host) = &args.host {
        client_config = client_config.with_host(host.clone());
    }
    if args.port.is_some() {
        client_config = client_config.with_port(args.port);
    }
    if args.insecure {
        client_config = client_config.with_secure(false);
    }
    if let Some(secs) = args.timeout {
        client_config = client_config.with_timeout(Duration::from_secs(secs));
    }

    Ok(TraxClient::new(client_config)?)
}

fn poller_config(interval: Option<u64>, toml: &TomlConfig) -> PollerConfig {
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| toml.poll_interval());
    PollerConfig::with_interval(interval)
}

fn init_tracing(debug: bool, toml: &TomlConfig) {
    let level = if debug {
        "debug".to_string()
    } else {
        toml.logging.level.clone()
    };
    let default_filter = format!(
        "trax={0},trax_client={0},trax_common={0}",
        level
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn spawn_event_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                TraxEvent::JobProgress {
                    resource,
                    job_id,
                    status,
                    timestamp,
                    ..
                } => println!("{} {} {} status {}", timestamp, resource, job_id, status),
                TraxEvent::PollFailed {
                    resource,
                    job_id,
                    error,
                    ..
                } => eprintln!("{} {} status check failed: {}", resource, job_id, error),
                TraxEvent::StageCompleted { stage, detail, .. } => {
                    println!("{}: {}", stage, detail)
                }
                TraxEvent::StageFailed { stage, error, .. } => {
                    eprintln!("{} failed: {}", stage, error)
                }
                _ => {}
            }
        }
    });
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            token.cancel();
        }
    });
    cancel
}

fn report_download(outcome: DownloadOutcome) -> Result<()> {
    match outcome {
        DownloadOutcome::Written { path, bytes } => {
            println!("{} ({} bytes)", path.display(), bytes);
            Ok(())
        }
        DownloadOutcome::Skipped { status } => {
            bail!("Server responded with status {}, nothing written", status)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}
