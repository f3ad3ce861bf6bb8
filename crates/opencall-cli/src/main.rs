use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opencall_sync::{
    build_store_from_env, maybe_build_scheduler, CrawlConfig, CrawlOrchestrator,
};

#[derive(Debug, Parser)]
#[command(name = "opencall-cli")]
#[command(about = "Open-call crawler and gallery email directory")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one crawl cycle and print the report.
    Crawl,
    /// Rebuild the gallery email directory without crawling.
    SyncEmails,
    /// Serve the HTTP trigger surface.
    Serve,
    /// Run the cron scheduler in the foreground.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Crawl) {
        Commands::Crawl => {
            let report = opencall_sync::run_crawl_once_from_env().await?;
            println!(
                "crawl complete: run_id={} imported={} skipped={} expired={}",
                report.run_id,
                report.imported.len(),
                report.skipped,
                report.cleaned_expired
            );
            for error in &report.source_errors {
                eprintln!("source error: {error}");
            }
        }
        Commands::SyncEmails => {
            let outcome = opencall_sync::run_email_sync_once_from_env().await?;
            println!(
                "email sync complete: collected={} merged={} discovered={} upserted={} purged={} deactivated={}",
                outcome.collected,
                outcome.merged,
                outcome.discovered,
                outcome.upserted,
                outcome.purged,
                outcome.deactivated
            );
        }
        Commands::Serve => {
            opencall_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            let mut config = CrawlConfig::from_env();
            config.scheduler_enabled = true;
            let store = build_store_from_env(&config).await?;
            let orchestrator = Arc::new(CrawlOrchestrator::new(config, store)?);
            let _scheduler = maybe_build_scheduler(orchestrator).await?;
            println!("scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
