//! Command-line driver for the longform content pipeline.

mod args;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use args::{Cli, Commands};
use clap::Parser;
use log::{info, warn};
use longform::config::load_config;
use longform::{
    Config, ContentService, DirectoryCorpus, JobOutcome, JobStatusView, OpenAiCompatible,
    SqliteJobStore,
};
use secrecy::SecretString;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let mut config = match cli.config {
        Some(ref path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = cli.database_file {
        config.store.database_path = Some(path.display().to_string());
    }
    let service = build_service(config)?;

    match cli.command {
        Commands::Run(args) => {
            let id = service.start_job(args.into_params())?;
            println!("{}", id);
            let status = wait(&service, &id).await?;
            report(&status, true)
        }
        Commands::Status { id, document } => {
            let status = service.get_job_status(&id)?;
            print_status(&status, document)
        }
        Commands::List { stage } => {
            for status in service.list_jobs(&stage)? {
                println!(
                    "{}\t{}\t{:>3}%\t{}",
                    status.id,
                    status.stage,
                    status.progress,
                    status.updated_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Commands::Events { id } => {
            for event in service.job_events(&id)? {
                println!(
                    "{}\t{}\t{:>3}%\t{}",
                    event.timestamp.to_rfc3339(),
                    event.stage,
                    event.progress,
                    event.message
                );
            }
            Ok(())
        }
        Commands::Cancel { id } => {
            service.cancel_job(&id)?;
            info!("Cancelled job {}", id);
            Ok(())
        }
        Commands::Retry { id } => {
            service.retry_job(&id)?;
            let status = wait(&service, &id).await?;
            report(&status, true)
        }
        Commands::Recover => {
            let ids = service.recover_interrupted()?;
            info!("Recovering {} interrupted job(s)", ids.len());
            for id in ids {
                let status = wait(&service, &id).await?;
                print_status(&status, false)?;
            }
            Ok(())
        }
    }
}

fn init_logging(json: bool) -> Result<()> {
    tracing_log::LogTracer::init().context("Failed to bridge log records")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "longform=info,warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        )
    };
    result.context("Failed to install tracing subscriber")
}

fn build_service(config: Config) -> Result<ContentService> {
    let path = config
        .store
        .resolved_path()
        .context("No data directory available; pass --database-file")?;
    let store = SqliteJobStore::open(&path)
        .with_context(|| format!("Failed to open job database {}", path.display()))?;

    let mut llm = OpenAiCompatible::new(&config.llm.base_url, &config.llm.model);
    if let Some(ref var) = config.llm.api_key_env {
        match std::env::var(var) {
            Ok(key) => llm = llm.with_api_key(SecretString::from(key)),
            Err(_) => warn!("API key variable {} is not set; sending unauthenticated requests", var),
        }
    }

    let corpus = config.corpus_directory.clone();
    let mut builder = ContentService::builder(config, Arc::new(llm), Arc::new(store));
    if let Some(dir) = corpus {
        builder = builder.corpus(Arc::new(DirectoryCorpus::new(dir)));
    }
    Ok(builder.build())
}

/// Waits for the job, echoing its progress. Ctrl-C cancels it.
async fn wait(service: &ContentService, id: &str) -> Result<JobStatusView> {
    let mut events = service.subscribe();
    let job_id = id.to_string();
    let echo = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.job_id == job_id => {
                    eprintln!("[{:>3}%] {}: {}", event.progress, event.stage, event.message)
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let status = tokio::select! {
        status = service.wait_for(id) => status?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling job {}", id);
            service.cancel_job(id)?;
            service.wait_for(id).await?
        }
    };
    echo.abort();
    Ok(status)
}

fn report(status: &JobStatusView, with_document: bool) -> Result<()> {
    print_status(status, with_document)?;
    match status.outcome {
        JobOutcome::Failed { ref message } => bail!("Job {} failed: {}", status.id, message),
        JobOutcome::Cancelled => bail!("Job {} was cancelled", status.id),
        _ => Ok(()),
    }
}

fn print_status(status: &JobStatusView, with_document: bool) -> Result<()> {
    let mut summary = status.clone();
    let document = summary.partial_document.take();
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    if with_document {
        if let Some(document) = document {
            println!("{}", document);
        }
    }
    Ok(())
}
