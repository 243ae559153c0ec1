//! Migration Loader - Reads migration files from the filesystem
//!
//! A migration file is named `<version>.<name>.sql`. Its body holds two marker
//! lines; lines between `-- delimUp` and `-- delimDown` form the up script and
//! lines after `-- delimDown` form the down script. Lines are concatenated
//! without separators.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::definitions::{Migration, MigrationSet};
use crate::error::{DbError, DbResult};

pub const DELIM_UP: &str = "-- delimUp";
pub const DELIM_DOWN: &str = "-- delimDown";
pub const MIGRATION_EXT: &str = "sql";

#[derive(Clone, Copy)]
enum Zone {
    Preamble,
    Up,
    Down,
}

/// Load every `.sql` migration below `root`, sorted ascending by version
pub fn load(root: impl AsRef<Path>) -> DbResult<MigrationSet> {
    let root = root.as_ref();
    let mut migrations = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
            DbError::Io {
                path,
                source: e.into(),
            }
        })?;

        if entry.file_type().is_dir() || !has_migration_ext(entry.path()) {
            continue;
        }

        migrations.push(Migration::from_file(entry.path())?);
    }

    let set = MigrationSet::new(migrations)?;
    tracing::debug!(root = %root.display(), count = set.len(), "migrations loaded");
    Ok(set)
}

fn has_migration_ext(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == MIGRATION_EXT)
}

impl Migration {
    /// Parse a single migration file
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if !has_migration_ext(path) {
            return Err(DbError::InvalidMigrationExt {
                path: path.to_path_buf(),
            });
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DbError::InvalidMigrationName {
                name: path.display().to_string(),
            })?;

        let body = fs::read_to_string(path).map_err(|source| DbError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(file_name, &body)
    }

    /// Parse a migration from its file name and body
    pub fn parse(file_name: &str, body: &str) -> DbResult<Self> {
        let (version, name) = parse_file_name(file_name)?;

        let mut up = String::new();
        let mut down = String::new();
        let mut zone = Zone::Preamble;

        for line in body.lines() {
            match line {
                DELIM_UP => zone = Zone::Up,
                DELIM_DOWN => zone = Zone::Down,
                _ => match zone {
                    Zone::Preamble => {}
                    Zone::Up => up.push_str(line),
                    Zone::Down => down.push_str(line),
                },
            }
        }

        Ok(Migration {
            version,
            name,
            up,
            down,
        })
    }
}

fn parse_file_name(file_name: &str) -> DbResult<(u32, String)> {
    let invalid = || DbError::InvalidMigrationName {
        name: file_name.to_string(),
    };

    if file_name.rsplit_once('.').map(|(_, ext)| ext) != Some(MIGRATION_EXT) {
        return Err(DbError::InvalidMigrationExt {
            path: PathBuf::from(file_name),
        });
    }

    let parts: Vec<&str> = file_name.split('.').collect();
    match parts.as_slice() {
        [version, name, _] => {
            let version: u32 = version.parse().map_err(|_| invalid())?;
            // Versions are stored in a 32-bit signed column
            if version == 0 || version > i32::MAX as u32 {
                return Err(invalid());
            }
            Ok((version, (*name).to_string()))
        }
        _ => Err(invalid()),
    }
}

impl MigrationSet {
    /// Build a set from in-memory `(file_name, body)` pairs, such as
    /// `include_str!`-embedded files
    pub fn from_sources<I, N, B>(sources: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (N, B)>,
        N: AsRef<str>,
        B: AsRef<str>,
    {
        let migrations = sources
            .into_iter()
            .map(|(name, body)| Migration::parse(name.as_ref(), body.as_ref()))
            .collect::<DbResult<Vec<_>>>()?;
        MigrationSet::new(migrations)
    }
}

/// Write a new, empty migration to `dir` numbered after the highest existing version
pub fn create(dir: impl AsRef<Path>, name: &str) -> DbResult<PathBuf> {
    let dir = dir.as_ref();
    let name = name.trim().replace(' ', "_");
    if name.is_empty() || name.contains('.') || name.contains(std::path::MAIN_SEPARATOR) {
        return Err(DbError::InvalidMigrationName { name });
    }

    let next_version = if dir.exists() {
        load(dir)?.latest_version() + 1
    } else {
        1
    };

    fs::create_dir_all(dir).map_err(|source| DbError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(format!("{}.{}.{}", next_version, name, MIGRATION_EXT));
    let template = format!(
        "-- Migration: {}\n{}\n\n{}\n\n",
        name, DELIM_UP, DELIM_DOWN
    );
    fs::write(&path, template).map_err(|source| DbError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!(path = %path.display(), version = next_version, "migration created");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CREATE_USERS: &str = "-- delimUp\ncreate table users\n(\n    id serial primary key\n);\n-- delimDown\ndrop table users;\n";

    fn write(dir: &Path, file: &str, body: &str) {
        fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_parse_concatenates_lines() {
        let migration = Migration::parse("1.create_user_table.sql", CREATE_USERS).unwrap();
        assert_eq!(migration.version, 1);
        assert_eq!(migration.name, "create_user_table");
        assert_eq!(migration.up, "create table users(    id serial primary key);");
        assert_eq!(migration.down, "drop table users;");
    }

    #[test]
    fn test_preamble_is_discarded_and_crlf_stripped() {
        let body = "-- author: ops\r\n-- delimUp\r\nselect 1;\r\n-- delimDown\r\nselect 2;\r\n";
        let migration = Migration::parse("7.noop.sql", body).unwrap();
        assert_eq!(migration.up, "select 1;");
        assert_eq!(migration.down, "select 2;");
    }

    #[test]
    fn test_markers_must_match_whole_line() {
        let body = "-- delimUp\n  -- delimDown\nselect 1;";
        let migration = Migration::parse("1.a.sql", body).unwrap();
        assert_eq!(migration.up, "  -- delimDownselect 1;");
        assert!(migration.down.is_empty());
    }

    #[test]
    fn test_invalid_file_names() {
        for name in ["users.sql", "1.2.users.sql", "x.users.sql", "0.users.sql", "-1.users.sql"] {
            assert!(
                matches!(Migration::parse(name, ""), Err(DbError::InvalidMigrationName { .. })),
                "{} should be rejected",
                name
            );
        }
        for name in ["1.users.txt", "users.txt", "1.2.users.txt", "users"] {
            assert!(
                matches!(Migration::parse(name, ""), Err(DbError::InvalidMigrationExt { .. })),
                "{} should be rejected for its extension",
                name
            );
        }
    }

    #[test]
    fn test_from_sources_checks_extension_before_name() {
        let err = MigrationSet::from_sources([("users.txt", "-- delimUp\nselect 1;")]).unwrap_err();
        assert!(matches!(err, DbError::InvalidMigrationExt { .. }));

        let err = MigrationSet::from_sources([("users.sql", "-- delimUp\nselect 1;")]).unwrap_err();
        assert!(matches!(err, DbError::InvalidMigrationName { .. }));
    }

    #[test]
    fn test_from_file_rejects_other_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1.users.txt", CREATE_USERS);
        let err = Migration::from_file(dir.path().join("1.users.txt")).unwrap_err();
        assert!(err.to_string().starts_with("invalid migration ext"));
    }

    #[test]
    fn test_load_sorts_and_skips_other_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "10.create_ip_table.sql", "-- delimUp\ncreate table ip();");
        write(dir.path(), "2.create_session_table.sql", "-- delimUp\ncreate table sessions();");
        write(dir.path(), "README.md", "not a migration");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write(&dir.path().join("nested"), "1.create_user_table.sql", CREATE_USERS);

        let set = load(dir.path()).unwrap();
        assert_eq!(set.versions(), vec![1, 2, 10]);
        assert_eq!(set.get(2).unwrap().up, "create table sessions();");
    }

    #[test]
    fn test_load_rejects_malformed_name() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1.create_user_table.sql", CREATE_USERS);
        write(dir.path(), "create_session_table.sql", "");
        assert!(matches!(load(dir.path()), Err(DbError::InvalidMigrationName { .. })));
    }

    #[test]
    fn test_load_rejects_duplicate_versions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1.create_user_table.sql", CREATE_USERS);
        write(dir.path(), "1.create_other_table.sql", CREATE_USERS);
        assert!(matches!(
            load(dir.path()),
            Err(DbError::DuplicateMigration { version: 1, .. })
        ));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = load(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, DbError::Io { .. }));
    }

    #[test]
    fn test_from_sources() {
        let set = MigrationSet::from_sources([
            ("2.create_session_table.sql", "-- delimUp\ncreate table sessions();"),
            ("1.create_user_table.sql", CREATE_USERS),
        ])
        .unwrap();
        assert_eq!(set.versions(), vec![1, 2]);
    }

    #[test]
    fn test_create_numbers_after_latest() {
        let dir = TempDir::new().unwrap();
        let migrations = dir.path().join("migrations");

        let first = create(&migrations, "create user table").unwrap();
        assert_eq!(first.file_name().unwrap(), "1.create_user_table.sql");

        write(&migrations, "5.create_ip_table.sql", "");
        let next = create(&migrations, "add_index").unwrap();
        assert_eq!(next.file_name().unwrap(), "6.add_index.sql");

        let created = Migration::from_file(&next).unwrap();
        assert_eq!(created.version, 6);
        assert!(created.up.is_empty() && created.down.is_empty());

        assert!(create(&migrations, "bad.name").is_err());
    }
}
