mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use reelkeeper::setup::{self, Overrides};
use rk_av::ToolRegistry;
use rk_core::config::Config;
use rk_core::events::{Event, EventBus};
use rk_pipeline::{
    catalog, BatchController, BatchRun, FlowOrchestrator, FlowSettings, FlowStep, LogReporter,
    ProgressReporter, StopReason,
};

/// How long to wait for buffered progress events after a batch.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelkeeper=trace,rk_pipeline=debug,rk_av=debug,rk_core=debug".to_string()
        } else {
            "reelkeeper=info,rk_pipeline=info,rk_av=info,rk_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            files,
            concurrency,
            force,
            enable,
            disable,
            json,
            events,
        } => {
            let overrides = Overrides {
                enable,
                disable,
                force_reprocess: force,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ingest(files, cli.config.as_deref(), concurrency, overrides, json, events))
        }
        Commands::Steps { json } => list_steps(cli.config.as_deref(), json),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env();
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    config
}

async fn ingest(
    files: Vec<PathBuf>,
    config_path: Option<&Path>,
    concurrency: Option<usize>,
    overrides: Overrides,
    json: bool,
    events: bool,
) -> Result<()> {
    let config = load_config(config_path);
    let options = setup::run_options(&config, &overrides)?;

    for file in files.iter().filter(|f| !f.exists()) {
        tracing::warn!("Input file does not exist: {:?}", file);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let collaborators = setup::build_collaborators(&config, &tools)?;
    let (reporter, event_stream) = if events {
        let bus = Arc::new(EventBus::default());
        let stream = tokio::spawn(stream_events(bus.subscribe()));
        (bus as Arc<dyn ProgressReporter>, Some(stream))
    } else {
        (Arc::new(LogReporter) as Arc<dyn ProgressReporter>, None)
    };
    let orchestrator = Arc::new(
        FlowOrchestrator::new(collaborators, FlowSettings::from_config(&config))
            .with_reporter(reporter),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing files in flight");
            on_signal.cancel();
        }
    });

    let session = setup::session(&config);
    if session.is_none() {
        let gated: Vec<_> = FlowStep::ALL
            .into_iter()
            .filter(|s| s.requires_session())
            .map(FlowStep::name)
            .collect();
        tracing::info!("No API token configured; skipping {}", gated.join(", "));
    }

    let controller = BatchController::new(orchestrator)
        .with_options(options)
        .with_user(setup::user_id(&config))
        .with_session(session)
        .with_cancellation(cancel);
    let limit = concurrency.unwrap_or(config.pipeline.concurrency_limit);
    let batch = controller.run_batch(files, limit).await;

    // The stream ends once the last reporter handle is dropped.
    drop(controller);
    if let Some(stream) = event_stream {
        let _ = tokio::time::timeout(EVENT_DRAIN_TIMEOUT, stream).await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&batch.summary())?);
    } else {
        print_batch(&batch);
    }

    let failed = batch.failed();
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, batch.files.len());
    }
    if !batch.unprocessed.is_empty() {
        anyhow::bail!("batch cancelled; {} files not processed", batch.unprocessed.len());
    }
    Ok(())
}

async fn stream_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{line}"),
                Err(e) => tracing::debug!(error = %e, "Failed to encode progress event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Progress stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_batch(batch: &BatchRun) {
    println!("Batch {} ({} files, limit {})", batch.batch_id, batch.files.len(), batch.concurrency_limit);

    for outcome in &batch.outcomes {
        let run = &outcome.run;
        let status = match run.stop_reason {
            StopReason::None if run.step_errors.is_empty() => "ok",
            StopReason::None => "ok (with errors)",
            StopReason::DuplicateDetected => "duplicate",
            StopReason::FatalError => "FAILED",
        };
        print!("  {} {}", status, outcome.file.display());
        if let Some(id) = run.context.record_id {
            print!(" -> {}", id);
        }
        if let Some(dup) = &run.context.duplicate {
            print!(" (matches {})", dup.record_id);
        }
        println!();

        for (step, error) in &run.step_errors {
            println!("      {}: {}", step, error);
        }
    }

    for file in &batch.unprocessed {
        println!("  skipped {}", file.display());
    }

    println!(
        "\n{} succeeded, {} duplicates, {} failed",
        batch.succeeded(),
        batch.duplicates(),
        batch.failed()
    );
}

fn list_steps(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path);
    let options = setup::run_options(&config, &Overrides::default())?;
    let steps = catalog::catalog(&options);

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    for step in &steps {
        let mark = if step.enabled { "x" } else { " " };
        println!("[{}] {:<24} {}", mark, step.name, step.description);
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Steps that need them will fail.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Concurrency limit: {}", config.pipeline.concurrency_limit);
    println!("  Task timeout: {}s", config.pipeline.task_timeout_secs);
    println!("  Store: {}", config.storage.store_dir.display());
    println!("  Step overrides: {}", config.pipeline.steps.len());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }

    setup::run_options(&config, &Overrides::default())?;
    Ok(())
}
