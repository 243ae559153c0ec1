mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::logging::{init_logging, LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "dbkit")]
#[command(about = "Apply, roll back and inspect versioned SQL migrations")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(long, short, global = true, default_value = "dbkit.yaml")]
    config: PathBuf,

    /// Migrations directory, overriding the config file
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,

    /// Database URL, overriding the configured connector
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Database migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommands {
    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },

    /// Apply all pending migrations
    Up,

    /// Roll back all applied migrations
    Down,

    /// Show applied and pending migrations
    Status,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        // The default path may be absent; an explicit one may not.
        let optional = self.config == PathBuf::from("dbkit.yaml");
        let mut config = Config::load(&self.config, optional)?.with_database_url(self.database_url.clone());
        if let Some(dir) = &self.migrations {
            config.migrations = dir.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    })
    .map_err(|e| anyhow::anyhow!("cannot initialize logging: {e}"))?;

    let config = cli.load_config()?;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Create { name } => commands::migrate::create(&config, &name).await?,
            MigrateCommands::Up => commands::migrate::up(&config).await?,
            MigrateCommands::Down => commands::migrate::down(&config).await?,
            MigrateCommands::Status => commands::migrate::status(&config).await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate_up() {
        let cli = Cli::try_parse_from(["dbkit", "migrate", "up"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("dbkit.yaml"));
        assert_eq!(cli.log_format, LogFormat::Plain);
        assert!(matches!(
            cli.command,
            Commands::Migrate { migrate_command: MigrateCommands::Up }
        ));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dbkit",
            "migrate",
            "create",
            "add_users",
            "--migrations",
            "db/migrations",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.migrations, Some(PathBuf::from("db/migrations")));
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Migrate {
                migrate_command: MigrateCommands::Create { name },
            } => assert_eq!(name, "add_users"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["dbkit", "migrate", "sideways"]).is_err());
    }

    #[test]
    fn test_load_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.yaml");
        std::fs::write(&path, "driver: postgres\nmigrations: sql\n").unwrap();

        let cli = Cli::try_parse_from([
            "dbkit",
            "--config",
            path.to_str().unwrap(),
            "--migrations",
            "other",
            "--database-url",
            "postgres://localhost/app",
            "migrate",
            "status",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.migrations, PathBuf::from("other"));
        assert_eq!(config.driver().unwrap(), "postgres");
        assert!(config.connector().is_ok());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let cli = Cli::try_parse_from(["dbkit", "--config", "/nonexistent/dbkit.yaml", "migrate", "up"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}
