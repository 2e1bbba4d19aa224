use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Pool, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*(\n|$)").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r" *([(),]) *").unwrap());
static QUOTED_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r#""(\w+)""#).unwrap());

/// Schema objects as recorded in `sqlite_master`, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, String>,
    pub indices: BTreeMap<String, String>,
    pub columns: BTreeMap<String, Vec<String>>,
    pub user_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    pub name: String,
    pub removed_columns: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SchemaDiff {
    pub new_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    pub modified_tables: Vec<TableChange>,
    pub new_indices: Vec<String>,
    pub removed_indices: Vec<String>,
    pub modified_indices: Vec<String>,
    pub user_version: Option<i64>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.modified_tables.is_empty()
            && self.new_indices.is_empty()
            && self.removed_indices.is_empty()
            && self.modified_indices.is_empty()
            && self.user_version.is_none()
    }

    /// Human readable list of changes that would lose data.
    pub fn destructive_changes(&self) -> Vec<String> {
        let tables = self
            .removed_tables
            .iter()
            .map(|t| format!("drop table {}", t));
        let columns = self.modified_tables.iter().flat_map(|t| {
            t.removed_columns
                .iter()
                .map(move |c| format!("drop column {}.{}", t.name, c))
        });
        let indices = self
            .removed_indices
            .iter()
            .map(|i| format!("drop index {}", i));

        tables.chain(columns).chain(indices).collect()
    }
}

pub fn normalize_sql(sql: &str) -> String {
    let sql = COMMENTS.replace_all(sql, "");
    let sql = WHITESPACE.replace_all(&sql, " ");
    let sql = PUNCTUATION.replace_all(&sql, "$1");
    let sql = QUOTED_IDENT.replace_all(&sql, "$1");
    sql.trim().to_string()
}

/// Compares two snapshots. Objects are matched by name and compared by
/// their normalized SQL.
pub fn diff_snapshots(current: &SchemaSnapshot, target: &SchemaSnapshot) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for (name, sql) in &target.tables {
        match current.tables.get(name) {
            None => diff.new_tables.push(name.clone()),
            Some(existing) if normalize_sql(existing) != normalize_sql(sql) => {
                let target_columns: BTreeSet<&String> = target
                    .columns
                    .get(name)
                    .map(|cols| cols.iter().collect())
                    .unwrap_or_default();
                let removed_columns = current
                    .columns
                    .get(name)
                    .map(|cols| {
                        cols.iter()
                            .filter(|c| !target_columns.contains(c))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                diff.modified_tables.push(TableChange {
                    name: name.clone(),
                    removed_columns,
                });
            }
            Some(_) => {}
        }
    }
    diff.removed_tables = current
        .tables
        .keys()
        .filter(|name| !target.tables.contains_key(*name))
        .cloned()
        .collect();

    for (name, sql) in &target.indices {
        match current.indices.get(name) {
            None => diff.new_indices.push(name.clone()),
            Some(existing) if normalize_sql(existing) != normalize_sql(sql) => {
                diff.modified_indices.push(name.clone())
            }
            Some(_) => {}
        }
    }
    diff.removed_indices = current
        .indices
        .keys()
        .filter(|name| !target.indices.contains_key(*name))
        .cloned()
        .collect();

    if current.user_version != target.user_version && target.user_version != 0 {
        diff.user_version = Some(target.user_version);
    }

    diff
}

#[instrument(skip_all)]
pub async fn snapshot_schema(conn: &mut SqliteConnection) -> Result<SchemaSnapshot, AppError> {
    let mut snapshot = SchemaSnapshot::default();

    let rows = sqlx::query(
        "SELECT type, name, sql FROM sqlite_master
         WHERE type IN ('table', 'index') AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *conn)
    .await?;

    for row in rows {
        let kind: String = row.get(0);
        let name: String = row.get(1);
        let sql: String = row.get(2);
        match kind.as_str() {
            "table" => {
                snapshot.tables.insert(name, sql);
            }
            _ => {
                snapshot.indices.insert(name, sql);
            }
        }
    }

    let table_names: Vec<String> = snapshot.tables.keys().cloned().collect();
    for table in table_names {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
            .fetch_all(&mut *conn)
            .await?;
        let columns = rows.iter().map(|row| row.get::<String, _>(1)).collect();
        snapshot.columns.insert(table, columns);
    }

    snapshot.user_version = sqlx::query("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await?
        .get::<i64, _>(0);

    Ok(snapshot)
}

pub struct DeclarativeMigrator {
    pool: Pool<Sqlite>,
    target_schema: String,
    allow_deletions: bool,
}

impl DeclarativeMigrator {
    pub fn new(pool: Pool<Sqlite>, target_schema: &str, allow_deletions: bool) -> Self {
        Self {
            pool,
            target_schema: target_schema.to_string(),
            allow_deletions,
        }
    }

    /// Builds the target schema in a scratch in-memory database and snapshots it.
    async fn target_snapshot(&self) -> Result<SchemaSnapshot, AppError> {
        let pristine = SqlitePool::connect("sqlite::memory:").await?;
        let mut conn = pristine.acquire().await?;
        if !self.target_schema.trim().is_empty() {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&self.target_schema))
                .await
                .map_err(|e| {
                    AppError::Internal(format!("Failed to create pristine schema: {}", e))
                })?;
        }
        snapshot_schema(&mut conn).await
    }

    /// Diff between the live database and the target schema, without applying it.
    #[cfg(test)]
    pub async fn plan(&self) -> Result<SchemaDiff, AppError> {
        let target = self.target_snapshot().await?;
        let mut conn = self.pool.acquire().await?;
        let current = snapshot_schema(&mut conn).await?;
        Ok(diff_snapshots(&current, &target))
    }

    /// Applies the target schema. Returns whether anything changed.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<bool, AppError> {
        info!("Starting declarative database migration");

        let target = self.target_snapshot().await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("PRAGMA defer_foreign_keys = TRUE")
            .execute(&mut *tx)
            .await?;

        let current = snapshot_schema(&mut tx).await?;
        let diff = diff_snapshots(&current, &target);

        if diff.is_empty() {
            tx.commit().await?;
            info!("No schema changes needed");
            return Ok(false);
        }

        let destructive = diff.destructive_changes();
        if !destructive.is_empty() && !self.allow_deletions {
            tx.rollback().await?;
            return Err(AppError::Internal(format!(
                "Migration requires destructive changes {:?}, but allow_deletions=false",
                destructive
            )));
        }

        let mut changes = 0u32;

        for name in &diff.new_tables {
            execute_change(&mut tx, &format!("Create table {}", name), &target.tables[name])
                .await?;
            changes += 1;
        }

        for table in &diff.modified_tables {
            changes += rebuild_table(&mut tx, &current, &target, &table.name).await?;
        }

        for name in &diff.removed_tables {
            execute_change(
                &mut tx,
                &format!("Drop table {}", name),
                &format!("DROP TABLE {}", name),
            )
            .await?;
            changes += 1;
        }

        // Rebuilt tables lose their indices, so re-read what is left before syncing them.
        let live = snapshot_schema(&mut tx).await?;
        for (name, sql) in &live.indices {
            let wanted = target.indices.get(name);
            if wanted.is_none_or(|t| normalize_sql(t) != normalize_sql(sql)) {
                execute_change(
                    &mut tx,
                    &format!("Drop index {}", name),
                    &format!("DROP INDEX {}", name),
                )
                .await?;
                changes += 1;
            }
        }
        for (name, sql) in &target.indices {
            let existing = live.indices.get(name);
            if existing.is_none_or(|e| normalize_sql(e) != normalize_sql(sql)) {
                execute_change(&mut tx, &format!("Create index {}", name), sql).await?;
                changes += 1;
            }
        }

        if let Some(version) = diff.user_version {
            execute_change(
                &mut tx,
                &format!("Set user_version to {}", version),
                &format!("PRAGMA user_version = {}", version),
            )
            .await?;
            changes += 1;
        }

        tx.commit().await?;

        if changes > 0 {
            info!("Running VACUUM after migration");
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }

        info!(changes, "Migration completed");
        Ok(changes > 0)
    }
}

async fn execute_change(
    conn: &mut SqliteConnection,
    description: &str,
    sql: &str,
) -> Result<(), AppError> {
    info!("Database migration: {} with SQL:\n{}", description, sql);
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

/// Recreates `table` with its target definition, keeping the columns both
/// definitions share.
#[instrument(skip(conn, current, target))]
async fn rebuild_table(
    conn: &mut SqliteConnection,
    current: &SchemaSnapshot,
    target: &SchemaSnapshot,
    table: &str,
) -> Result<u32, AppError> {
    let temp_name = format!("{}_migration_new", table);
    let temp_sql = target.tables[table].replacen(
        &format!("CREATE TABLE {}", table),
        &format!("CREATE TABLE {}", temp_name),
        1,
    );
    execute_change(conn, &format!("Create temporary table for {}", table), &temp_sql).await?;

    let target_columns: BTreeSet<&String> = target
        .columns
        .get(table)
        .map(|c| c.iter().collect())
        .unwrap_or_default();
    let shared: Vec<&str> = current
        .columns
        .get(table)
        .map(|cols| {
            cols.iter()
                .filter(|c| target_columns.contains(c))
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default();

    let mut changes = 2;
    if shared.is_empty() {
        warn!(table, "No shared columns, table data is not carried over");
    } else {
        let columns = shared.join(", ");
        execute_change(
            conn,
            &format!("Copy data to new {}", table),
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                temp_name, columns, columns, table
            ),
        )
        .await?;
        changes += 1;
    }

    execute_change(conn, &format!("Drop old table {}", table), &format!("DROP TABLE {}", table))
        .await?;
    execute_change(
        conn,
        &format!("Rename new table to {}", table),
        &format!("ALTER TABLE {} RENAME TO {}", temp_name, table),
    )
    .await?;

    Ok(changes)
}

#[instrument(skip(pool, target_schema))]
pub async fn migrate_database_declaratively(
    pool: Pool<Sqlite>,
    target_schema: &str,
    allow_deletions: bool,
) -> Result<bool, AppError> {
    DeclarativeMigrator::new(pool, target_schema, allow_deletions)
        .migrate()
        .await
}
