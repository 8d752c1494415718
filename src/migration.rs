//! SQL migrations read from a directory.
//!
//! Each `*.sql` file is one migration, identified by its file name. Names
//! with a numeric prefix apply in numeric order (`2_` before `10_`) and come
//! before the rest, which apply in name order. Statements after `-- +migrate Up` apply it and
//! statements after `-- +migrate Down` revert it. Applied ids are recorded in
//! the `sql_migrations` table.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::db::Pool;
use crate::template::Template;
use crate::{Error, Result};

const DEFAULT_TABLE: &str = "sql_migrations";
const UP_DIRECTIVE: &str = "-- +migrate Up";
const DOWN_DIRECTIVE: &str = "-- +migrate Down";

#[derive(Clone, Copy)]
enum Section {
    None,
    Up,
    Down,
}

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub id: String,
    pub up: String,
    pub down: String,
}

impl MigrationFile {
    /// Split `content` into its Up and Down sections.
    pub fn parse(id: impl Into<String>, content: &str) -> Result<Self> {
        let id = id.into();
        let mut up = String::new();
        let mut down = String::new();
        let mut section = Section::None;
        let mut has_up = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with(UP_DIRECTIVE) {
                has_up = true;
                section = Section::Up;
                continue;
            }
            if trimmed.starts_with(DOWN_DIRECTIVE) {
                section = Section::Down;
                continue;
            }
            let buf = match section {
                Section::None => continue,
                Section::Up => &mut up,
                Section::Down => &mut down,
            };
            buf.push_str(line);
            buf.push('\n');
        }

        if !has_up {
            return Err(Error::illegal_argument(format!(
                "Migration {id} has no '{UP_DIRECTIVE}' section."
            )));
        }
        Ok(Self {
            id,
            up: up.trim().to_string(),
            down: down.trim().to_string(),
        })
    }
}

/// Migrations stored as `*.sql` files in a directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every migration in apply order.
    pub fn load(&self) -> Result<Vec<MigrationFile>> {
        let paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "sql"))
            .collect();

        let mut migrations = paths
            .iter()
            .map(|path| {
                let id = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let content = std::fs::read_to_string(path)?;
                MigrationFile::parse(id, &content)
            })
            .collect::<Result<Vec<_>>>()?;
        migrations.sort_by(|a, b| by_id(&a.id, &b.id));
        Ok(migrations)
    }
}

/// Leading digits of a migration id, if any.
fn version(id: &str) -> Option<u64> {
    let end = id.find(|c: char| !c.is_ascii_digit()).unwrap_or(id.len());
    id[..end].parse().ok()
}

/// Migration order: numeric prefixes first, by value, then by name.
fn by_id(a: &str, b: &str) -> Ordering {
    match (version(a), version(b)) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Applies and reverts migrations on a pool.
#[derive(Debug, Clone)]
pub struct Migration {
    tpl: Template,
    source: FileSource,
    table: String,
}

impl Migration {
    pub fn new(pool: Pool, source: FileSource) -> Self {
        Self {
            tpl: Template::new(pool),
            source,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Record applied migrations in `table` instead of `sql_migrations`.
    pub fn with_table(mut self, table: &str) -> Result<Self> {
        let valid = !table.is_empty()
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::illegal_argument(format!(
                "Invalid migrations table name: {table}"
            )));
        }
        self.table = table.to_string();
        Ok(self)
    }

    /// Apply every pending migration. Returns how many were applied.
    pub async fn up(&self) -> Result<usize> {
        let migrations = self.source.load()?;
        let applied = self.applied().await?;

        let known: HashSet<&str> = migrations.iter().map(|m| m.id.as_str()).collect();
        if let Some(unknown) = applied.iter().find(|id| !known.contains(id.as_str())) {
            return Err(Error::illegal_state(format!(
                "Unknown migration in database: {unknown}"
            )));
        }

        let mut count = 0;
        for migration in migrations.iter().filter(|m| !applied.contains(&m.id)) {
            let record = format!("INSERT INTO {} (id, applied_at) VALUES (?1, ?2)", self.table);
            self.run(migration.id.clone(), migration.up.clone(), record, true)
                .await?;

            tracing::info!("Applied migration {}", migration.id);
            count += 1;
        }
        Ok(count)
    }

    /// Revert every applied migration, newest first. Returns how many were
    /// reverted.
    pub async fn down(&self) -> Result<usize> {
        let migrations = self.source.load()?;
        let applied = self.applied().await?;

        let mut count = 0;
        for id in applied.iter().rev() {
            let migration = migrations.iter().find(|m| &m.id == id).ok_or_else(|| {
                Error::illegal_state(format!("Unknown migration in database: {id}"))
            })?;

            let record = format!("DELETE FROM {} WHERE id = ?1", self.table);
            self.run(migration.id.clone(), migration.down.clone(), record, false)
                .await?;

            tracing::info!("Reverted migration {}", migration.id);
            count += 1;
        }
        Ok(count)
    }

    /// Run `sql` and update the migrations table in one transaction.
    async fn run(&self, id: String, sql: String, record: String, applying: bool) -> Result<()> {
        self.tpl
            .tx_do(move |tx| {
                Box::pin(async move {
                    if !sql.is_empty() {
                        tx.execute_batch(&sql).await.map_err(|e| {
                            Error::database(format!("Migration {id} failed: {e}"))
                        })?;
                    }
                    if applying {
                        let applied_at = jiff::Timestamp::now().to_string();
                        tx.execute(&record, libsql::params![id.as_str(), applied_at])
                            .await?;
                    } else {
                        tx.execute(&record, libsql::params![id.as_str()]).await?;
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Ids of applied migrations in apply order.
    pub async fn applied(&self) -> Result<Vec<String>> {
        let conn = self.tpl.pool().get().await?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
                self.table
            ),
            (),
        )
        .await?;

        let mut rows = conn
            .query(&format!("SELECT id FROM {}", self.table), ())
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        ids.sort_by(|a, b| by_id(a, b));
        Ok(ids)
    }
}
