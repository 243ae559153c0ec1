use std::path::Path;

use dbkit::backends::backend_for;
use dbkit::migrations::{self, MigrationRunner};
use dbkit::{Command, Database, MigrationSet, RunReport};

use crate::config::Config;

pub async fn create(config: &Config, name: &str) -> anyhow::Result<()> {
    let path = migrations::create(&config.migrations, name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn up(config: &Config) -> anyhow::Result<()> {
    let report = execute(config, Command::Apply).await?;
    print_report(&report);
    Ok(())
}

pub async fn down(config: &Config) -> anyhow::Result<()> {
    let report = execute(config, Command::Rollback).await?;
    print_report(&report);
    Ok(())
}

pub async fn status(config: &Config) -> anyhow::Result<()> {
    let set = load_set(&config.migrations)?;
    let db = open(config).await?;
    let result = MigrationRunner::new(db.pool()).status(&set).await;
    db.close().await;
    let statuses = result?;

    if statuses.is_empty() {
        println!("No migrations found in {}", config.migrations.display());
        return Ok(());
    }

    println!("{:<10} {:<40} {}", "VERSION", "NAME", "APPLIED");
    for status in statuses {
        let applied = match (status.applied, status.applied_at) {
            (true, Some(at)) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            (true, None) => "yes".to_string(),
            (false, _) => "pending".to_string(),
        };
        println!("{:<10} {:<40} {}", status.version, status.name, applied);
    }
    Ok(())
}

async fn execute(config: &Config, command: Command) -> anyhow::Result<RunReport> {
    let set = load_set(&config.migrations)?;
    let db = open(config).await?;
    let result = db.migrate(command, &set).await;
    db.close().await;
    Ok(result?)
}

async fn open(config: &Config) -> anyhow::Result<Database> {
    let backend = backend_for(config.driver()?)?;
    let db = Database::open(
        backend.as_ref(),
        config.connector()?,
        &config.pool.to_pool_config(),
        &config.retry.to_retry_policy(),
    )
    .await?;
    Ok(db)
}

fn load_set(dir: &Path) -> anyhow::Result<MigrationSet> {
    if !dir.exists() {
        anyhow::bail!("migrations directory {} does not exist", dir.display());
    }
    let set = migrations::load(dir)?;
    tracing::debug!(count = set.len(), dir = %dir.display(), "loaded migrations");
    Ok(set)
}

fn print_report(report: &RunReport) {
    if report.is_noop() {
        println!("Nothing to {}; database is at version {}", report.command, report.from_version);
        return;
    }
    println!(
        "{} {} migration(s): version {} -> {} in {:?}",
        match report.command {
            Command::Apply => "Applied",
            Command::Rollback => "Rolled back",
        },
        report.executed.len(),
        report.from_version,
        report.to_version,
        report.elapsed
    );
}
