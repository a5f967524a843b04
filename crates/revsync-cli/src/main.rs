use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use revsync_core::Platform;
use revsync_storage::SqliteReviewStore;
use revsync_sync::{
    build_live_orchestrator, maybe_build_scheduler, run_update_once_from_env, AppRegistry,
    IngestionReport, IngestionRequest, SyncConfig,
};
use revsync_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "revsync")]
#[command(about = "App Store / Google Play review ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch reviews inside a window and print them as JSON.
    Fetch(WindowArgs),
    /// Fetch reviews inside a window and append the unseen ones to the store.
    Write(WindowArgs),
    /// Incremental ingest from the stored watermark. Without ids, runs every app in the registry.
    Update(TargetArgs),
    Migrate,
    Serve,
    Schedule,
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long)]
    app_store_id: Option<String>,
    #[arg(long)]
    google_play_id: Option<String>,
    #[arg(long)]
    country: Option<String>,
}

impl TargetArgs {
    fn has_target(&self) -> bool {
        self.app_store_id.is_some() || self.google_play_id.is_some()
    }

    fn apply(&self, mut request: IngestionRequest, config: &SyncConfig) -> IngestionRequest {
        if let Some(id) = &self.app_store_id {
            request = request.app_store(id.clone());
        }
        if let Some(id) = &self.google_play_id {
            request = request.google_play(id.clone());
        }
        request.country(self.country.clone().unwrap_or_else(|| config.country.clone()))
    }
}

#[derive(Debug, Args)]
struct WindowArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Inclusive start, `YYYY-MM-DD` or RFC 3339.
    #[arg(long)]
    start: String,
    /// Inclusive end; a bare date covers the whole day.
    #[arg(long)]
    end: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("revsync=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Update(TargetArgs {
        app_store_id: None,
        google_play_id: None,
        country: None,
    })) {
        Commands::Fetch(args) => {
            let orchestrator = build_live_orchestrator(&config).await?;
            let request = args.target.apply(IngestionRequest::explicit(args.start, args.end), &config);
            let report = orchestrator.fetch(&request).await?;
            println!("{}", serde_json::to_string_pretty(&report).context("serializing report")?);
        }
        Commands::Write(args) => {
            let orchestrator = build_live_orchestrator(&config).await?;
            let request = args.target.apply(IngestionRequest::explicit(args.start, args.end), &config);
            let report = orchestrator.ingest(&request).await?;
            print_summary(&report);
        }
        Commands::Update(target) if target.has_target() => {
            let orchestrator = build_live_orchestrator(&config).await?;
            let report = orchestrator
                .ingest(&target.apply(IngestionRequest::incremental(), &config))
                .await?;
            print_summary(&report);
        }
        Commands::Update(_) => {
            let summary = run_update_once_from_env().await?;
            println!(
                "update complete: run_id={} apps={} written={}",
                summary.run_id,
                summary.apps.len(),
                summary.total_written()
            );
            for app in &summary.apps {
                match (&app.report, &app.error) {
                    (Some(report), _) => {
                        println!("[{}]", app.name);
                        print_summary(report);
                    }
                    (None, Some(err)) => println!("[{}] skipped: {err}", app.name),
                    (None, None) => {}
                }
            }
        }
        Commands::Migrate => {
            let store = SqliteReviewStore::connect(&config.database_url)
                .await
                .with_context(|| format!("connecting to {}", config.database_url))?;
            store.migrate().await?;
            store.close().await;
            println!("migrations applied: {}", config.database_url);
        }
        Commands::Serve => {
            let orchestrator = Arc::new(build_live_orchestrator(&config).await?);
            let scheduler = match AppRegistry::load(&config.apps_file).await {
                Ok(registry) => maybe_build_scheduler(&config, orchestrator.clone(), Arc::new(registry)).await?,
                Err(err) => {
                    info!(error = %err, "no app registry; scheduled updates disabled");
                    None
                }
            };
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }
            let state = AppState::new(orchestrator).with_default_country(config.country.clone());
            revsync_web::serve(state, config.web_port).await?;
        }
        Commands::Schedule => {
            let orchestrator = Arc::new(build_live_orchestrator(&config).await?);
            let registry = Arc::new(AppRegistry::load(&config.apps_file).await?);
            let Some(mut sched) = maybe_build_scheduler(&config, orchestrator, registry).await? else {
                bail!("scheduler disabled; set REVSYNC_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron_1 = %config.sync_cron_1, cron_2 = %config.sync_cron_2, "scheduler running");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

fn print_summary(report: &IngestionReport) {
    for platform in Platform::ALL {
        let Some(outcome) = report.outcome(platform) else {
            continue;
        };
        match &outcome.error {
            Some(err) => println!("  {}: error: {err}", platform.display_name()),
            None => println!(
                "  {}: fetched={} written={} duplicates={} requests={}{}",
                platform.display_name(),
                outcome.count,
                outcome.written,
                outcome.duplicates,
                outcome.requests,
                if outcome.budget_exhausted { " (budget exhausted)" } else { "" }
            ),
        }
    }
    println!("total fetched={} written={}", report.total_count, report.total_written);
}
