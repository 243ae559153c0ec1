//! Migration Definitions - Core types for the migration engine

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// A versioned pair of scripts. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Positive, unique within a set
    pub version: u32,
    pub name: String,
    /// Script run when applying
    pub up: String,
    /// Script run when rolling back
    pub down: String,
}

/// Migrations ordered by version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set, sorting ascending and rejecting duplicate versions
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, DbError> {
        migrations.sort_by_key(|m| m.version);

        if let Some(pair) = migrations.windows(2).find(|pair| pair[0].version == pair[1].version) {
            return Err(DbError::DuplicateMigration {
                version: pair[0].version,
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }

        Ok(Self { migrations })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, version: u32) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|index| &self.migrations[index])
    }

    /// Highest version in the set, zero when empty
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    pub fn versions(&self) -> Vec<u32> {
        self.migrations.iter().map(|m| m.version).collect()
    }

    pub fn ascending(&self) -> impl DoubleEndedIterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn descending(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().rev()
    }

    /// Migrations an apply run executes from `current`, ascending
    pub fn pending(&self, current: u32) -> impl Iterator<Item = &Migration> {
        self.ascending().filter(move |m| m.version > current)
    }

    /// Migrations a rollback run executes from `current`, descending
    pub fn applied(&self, current: u32) -> impl Iterator<Item = &Migration> {
        self.descending().filter(move |m| m.version <= current)
    }
}

impl IntoIterator for MigrationSet {
    type Item = Migration;
    type IntoIter = std::vec::IntoIter<Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.into_iter()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}

/// Direction of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Apply,
    Rollback,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Apply => "apply",
            Command::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "apply" | "up" => Ok(Command::Apply),
            "rollback" | "down" => Ok(Command::Rollback),
            _ => Err(DbError::UnknownCommand(s.to_string())),
        }
    }
}

/// Wire code of a command: 1 applies, 2 rolls back
impl TryFrom<u8> for Command {
    type Error = DbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Apply),
            2 => Ok(Command::Rollback),
            other => Err(DbError::UnknownCommand(other.to_string())),
        }
    }
}

/// A row of the version table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u32,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub command: Command,
    pub from_version: u32,
    pub to_version: u32,
    /// Versions executed, in execution order
    pub executed: Vec<u32>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Applied state of one known migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: u32,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}
