use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use reportflow::adapters::{FileCostSource, JsonFileLedgerStore, OutboxDelivery};
use reportflow::cancellation::CancellationToken;
use reportflow::config::ReportflowConfig;
use reportflow::core::{Invocation, ReportDate};
use reportflow::events::{EventSink, JsonLinesEventSink, LoggingEventSink};
use reportflow::monitor::LivenessMonitor;
use reportflow::observability::init_tracing;
use reportflow::pipeline::{IdempotencyGuard, ReportPipeline};
use reportflow::ports::LedgerStore;

#[derive(Parser)]
#[command(
    name = "reportflow",
    about = "Daily cost report job: fetch, compose, deliver, record",
    version,
    propagate_version = true
)]
struct Cli {
    /// JSON config file (default: read REPORTFLOW_* environment variables)
    #[arg(long, global = true, env = "REPORTFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job once
    Run {
        /// Report date to process (default: yesterday in UTC)
        #[arg(long)]
        date: Option<ReportDate>,

        /// Mark the run as operator-triggered
        #[arg(long)]
        manual: bool,

        /// Abort the run after this many seconds
        #[arg(long)]
        timeout_seconds: Option<f64>,

        /// Raw invocation payload, e.g. '{"report_date":"2024-03-01"}'
        #[arg(long, conflicts_with_all = ["date", "manual", "timeout_seconds"])]
        payload: Option<String>,
    },

    /// Remove the ledger entry for a date so it is processed again
    Clear {
        /// Report date to clear
        #[arg(long)]
        date: ReportDate,
    },

    /// Check that the latest due report was completed
    CheckLiveness {
        /// Check this date instead of the latest due one
        #[arg(long)]
        date: Option<ReportDate>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ReportflowConfig> {
    match path {
        Some(path) => ReportflowConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => ReportflowConfig::from_env().context("loading config from environment"),
    }
}

fn build_invocation(
    date: Option<ReportDate>,
    manual: bool,
    timeout_seconds: Option<f64>,
    payload: Option<&str>,
) -> anyhow::Result<Invocation> {
    if let Some(payload) = payload {
        return Invocation::from_json(payload).context("parsing invocation payload");
    }
    let mut invocation = match (manual, date) {
        (true, Some(date)) => Invocation::manual(date),
        (true, None) => anyhow::bail!("--manual requires --date"),
        (false, Some(date)) => Invocation::scheduled().with_report_date(date),
        (false, None) => Invocation::scheduled(),
    };
    if let Some(seconds) = timeout_seconds {
        invocation = invocation.with_timeout_seconds(seconds);
    }
    Ok(invocation)
}

async fn run(
    config: ReportflowConfig,
    ledger: Arc<dyn LedgerStore>,
    invocation: Invocation,
) -> anyhow::Result<ExitCode> {
    let sink: Arc<dyn EventSink> = match &config.events_path {
        Some(path) => Arc::new(JsonLinesEventSink::new(path)),
        None => Arc::new(LoggingEventSink::info()),
    };
    let pipeline = ReportPipeline::builder()
        .source(Arc::new(FileCostSource::new(&config.cost_data_dir)))
        .delivery(Arc::new(OutboxDelivery::new(&config.outbox_dir)))
        .ledger(ledger)
        .event_sink(sink)
        .config(config)
        .build()
        .context("building pipeline")?;

    let token = Arc::new(CancellationToken::new());
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_signal.cancel("interrupted");
        }
    });

    let summary = pipeline.run_with_token(invocation, token).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.is_alert() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    let ledger: Arc<dyn LedgerStore> = Arc::new(JsonFileLedgerStore::new(&config.ledger_path));

    match cli.command {
        Commands::Run {
            date,
            manual,
            timeout_seconds,
            payload,
        } => {
            let invocation = build_invocation(date, manual, timeout_seconds, payload.as_deref())?;
            run(config, ledger, invocation).await
        }
        Commands::Clear { date } => {
            let removed = IdempotencyGuard::new(ledger)
                .clear(date)
                .await
                .with_context(|| format!("clearing ledger entry for {date}"))?;
            info!(%date, removed, "Clear finished");
            println!("{}", serde_json::json!({ "report_date": date, "removed": removed }));
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckLiveness { date } => {
            let monitor = LivenessMonitor::from_config(ledger, &config);
            let now = chrono::Utc::now();
            let check = match date {
                Some(date) => reportflow::monitor::LivenessCheck {
                    report_date: date,
                    status: monitor.check(date, now).await?,
                },
                None => monitor.check_latest(now).await?,
            };
            println!("{}", serde_json::to_string_pretty(&check)?);
            Ok(if check.status.is_alert() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
