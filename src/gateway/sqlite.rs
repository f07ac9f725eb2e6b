//! SQLite implementation of the gateway over an `sqlx` pool.
use super::rows::timestamp_text;
use super::{Filter, FolderRemoval, Gateway, GatewayError, GatewayResult, Row, Table};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row as _, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> GatewayResult<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let mut options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        // Enable WAL and stricter durability.
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }
    // An in-memory database lives as long as its connection; keep exactly one.
    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(if in_memory { 1 } else { 0 })
        .idle_timeout(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> GatewayResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn now_text() -> String {
    timestamp_text(Utc::now())
}

fn order_clause(table: Table) -> &'static str {
    match table {
        Table::Companies => "created_at DESC, rowid DESC",
        Table::Messages => "timestamp ASC, rowid ASC",
        Table::Folders => "name ASC, rowid ASC",
        Table::JobPositions | Table::Selectors | Table::InProgressStates => "name ASC",
        _ => "rowid ASC",
    }
}

fn check_column(table: Table, column: &str) -> GatewayResult<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(GatewayError::UnknownColumn {
            table,
            column: column.to_string(),
        })
    }
}

/// All columns are TEXT; non-string JSON scalars are stored in their JSON
/// text form.
fn bind_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn read_row(table: Table, row: &SqliteRow) -> GatewayResult<Row> {
    let mut out = Row::new();
    for column in table.columns() {
        let value: Option<String> = row.try_get(*column)?;
        out.insert(column.to_string(), value.map(Value::String).unwrap_or(Value::Null));
    }
    Ok(out)
}

#[derive(Clone, Debug)]
pub struct SqliteGateway {
    pool: Pool,
}

impl SqliteGateway {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Opens the database at `database_url` and applies pending migrations.
    pub async fn connect(database_url: &str) -> GatewayResult<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn in_memory() -> GatewayResult<Self> {
        Self::connect("sqlite::memory:").await
    }
}

/// Inserts `fields`, filling in `id` and `created_at` when absent. Returns
/// the row id.
async fn insert_row_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table: Table,
    mut fields: Row,
) -> GatewayResult<String> {
    for column in fields.keys() {
        check_column(table, column)?;
    }
    if !fields.get("id").is_some_and(Value::is_string) {
        fields.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    if !fields.get("created_at").is_some_and(Value::is_string) {
        fields.insert("created_at".into(), Value::String(now_text()));
    }
    let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name(),
        columns.join(", "),
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for value in fields.values() {
        query = query.bind(bind_text(value));
    }
    query.execute(&mut **tx).await?;

    Ok(fields
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Writes every non-id column of `fields`. Returns the affected row count,
/// zero when there was nothing to write.
async fn update_row_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table: Table,
    id: &str,
    fields: &Row,
) -> GatewayResult<u64> {
    let mut sets = Vec::with_capacity(fields.len());
    for column in fields.keys() {
        check_column(table, column)?;
        if column != "id" {
            sets.push(format!("{column} = ?"));
        }
    }
    if sets.is_empty() {
        return Ok(0);
    }
    let sql = format!("UPDATE {} SET {} WHERE id = ?", table.name(), sets.join(", "));
    let mut query = sqlx::query(&sql);
    for (_, value) in fields.iter().filter(|(k, _)| k.as_str() != "id") {
        query = query.bind(bind_text(value));
    }
    Ok(query.bind(id).execute(&mut **tx).await?.rows_affected())
}

async fn upsert_catalog_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table: Table,
    user_id: &str,
    name: &str,
) -> GatewayResult<(String, bool)> {
    let sql = format!(
        "INSERT INTO {} (id, user_id, name, created_at) VALUES (?, ?, ?, ?) ON CONFLICT(user_id, name) DO NOTHING",
        table.name()
    );
    let created = sqlx::query(&sql)
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(name)
        .bind(now_text())
        .execute(&mut **tx)
        .await?
        .rows_affected()
        > 0;
    let id: String = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE user_id = ? AND name = ?",
        table.name()
    ))
    .bind(user_id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;
    Ok((id, created))
}

async fn company_owner_tx(tx: &mut Transaction<'_, Sqlite>, company_id: &str) -> GatewayResult<String> {
    sqlx::query_scalar::<_, String>("SELECT user_id FROM companies WHERE id = ?")
        .bind(company_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| GatewayError::NotFound {
            table: Table::Companies,
            id: company_id.to_string(),
        })
}

async fn link_job_position_tx(
    tx: &mut Transaction<'_, Sqlite>,
    company_id: &str,
    user_id: &str,
    title: &str,
) -> GatewayResult<()> {
    let (job_position_id, _) = upsert_catalog_tx(tx, Table::JobPositions, user_id, title).await?;
    sqlx::query(
        "INSERT INTO company_job_positions (company_id, job_position_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(company_id)
    .bind(job_position_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn replace_links_tx(
    tx: &mut Transaction<'_, Sqlite>,
    company_id: &str,
    user_id: &str,
    titles: &[String],
) -> GatewayResult<()> {
    sqlx::query("DELETE FROM company_job_positions WHERE company_id = ?")
        .bind(company_id)
        .execute(&mut **tx)
        .await?;
    for title in titles {
        link_job_position_tx(tx, company_id, user_id, title).await?;
    }
    Ok(())
}

#[async_trait]
impl Gateway for SqliteGateway {
    #[instrument(skip_all, fields(table = %table))]
    async fn list(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>> {
        let mut clauses = Vec::with_capacity(filter.eq.len());
        for (column, value) in &filter.eq {
            check_column(table, column)?;
            if value.is_null() {
                clauses.push(format!("{column} IS NULL"));
            } else {
                clauses.push(format!("{column} = ?"));
            }
        }
        let mut sql = format!("SELECT {} FROM {}", table.columns().join(", "), table.name());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_clause(table));

        let mut query = sqlx::query(&sql);
        for (_, value) in filter.eq.iter().filter(|(_, v)| !v.is_null()) {
            query = query.bind(bind_text(value));
        }
        let rows = query.fetch_all(&self.pool).await?;
        debug!(count = rows.len(), "listed rows");
        rows.iter().map(|r| read_row(table, r)).collect()
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn get(&self, table: Table, id: &str) -> GatewayResult<Row> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            table.columns().join(", "),
            table.name()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(GatewayError::NotFound {
                table,
                id: id.to_string(),
            });
        };
        read_row(table, &row)
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert(&self, table: Table, fields: Row) -> GatewayResult<Row> {
        let mut tx = self.pool.begin().await?;
        let id = insert_row_tx(&mut tx, table, fields).await?;
        tx.commit().await?;
        self.get(table, &id).await
    }

    #[instrument(skip_all, fields(table = %table, id = %id))]
    async fn update(&self, table: Table, id: &str, fields: Row) -> GatewayResult<()> {
        if fields.keys().all(|k| k == "id") {
            // Nothing to write; still report a missing row.
            return self.get(table, id).await.map(|_| ());
        }
        let mut tx = self.pool.begin().await?;
        if update_row_tx(&mut tx, table, id, &fields).await? == 0 {
            return Err(GatewayError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table, id = %id))]
    async fn delete(&self, table: Table, id: &str) -> GatewayResult<()> {
        let affected = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.name()))
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(GatewayError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn upsert_by_name(
        &self,
        table: Table,
        user_id: &str,
        name: &str,
    ) -> GatewayResult<(Row, bool)> {
        if !table.is_catalog() {
            return Err(GatewayError::Unsupported(table));
        }
        let mut tx = self.pool.begin().await?;
        let (id, created) = upsert_catalog_tx(&mut tx, table, user_id, name).await?;
        tx.commit().await?;
        Ok((self.get(table, &id).await?, created))
    }

    #[instrument(skip_all)]
    async fn list_job_positions_for_company(&self, company_id: &str) -> GatewayResult<Vec<String>> {
        let titles = sqlx::query_scalar::<_, String>(
            "SELECT jp.name FROM company_job_positions cjp \
             JOIN job_positions jp ON jp.id = cjp.job_position_id \
             WHERE cjp.company_id = ? ORDER BY cjp.rowid",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(titles)
    }

    #[instrument(skip_all)]
    async fn replace_job_positions_for_company(
        &self,
        company_id: &str,
        titles: &[String],
    ) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;
        let user_id = company_owner_tx(&mut tx, company_id).await?;
        replace_links_tx(&mut tx, company_id, &user_id, titles).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn add_job_position(&self, company_id: &str, title: &str) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;
        let user_id = company_owner_tx(&mut tx, company_id).await?;
        link_job_position_tx(&mut tx, company_id, &user_id, title).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn create_company(&self, fields: Row, job_positions: &[String]) -> GatewayResult<Row> {
        let mut tx = self.pool.begin().await?;
        let id = insert_row_tx(&mut tx, Table::Companies, fields).await?;
        let user_id = company_owner_tx(&mut tx, &id).await?;
        for title in job_positions {
            link_job_position_tx(&mut tx, &id, &user_id, title).await?;
        }
        tx.commit().await?;
        debug!(links = job_positions.len(), "company created");
        self.get(Table::Companies, &id).await
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn update_company(
        &self,
        id: &str,
        fields: Row,
        job_positions: Option<&[String]>,
    ) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;
        let user_id = company_owner_tx(&mut tx, id).await?;
        update_row_tx(&mut tx, Table::Companies, id, &fields).await?;
        if let Some(titles) = job_positions {
            replace_links_tx(&mut tx, id, &user_id, titles).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(folder_id = %folder_id))]
    async fn delete_folder_unfiling_members(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> GatewayResult<FolderRemoval> {
        let mut tx = self.pool.begin().await?;
        let unfiled = sqlx::query(
            "UPDATE companies SET folder_id = NULL WHERE user_id = ? AND folder_id = ?",
        )
        .bind(user_id)
        .bind(folder_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let deleted = sqlx::query("DELETE FROM folders WHERE id = ? AND user_id = ?")
            .bind(folder_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if unfiled == 0 && deleted == 0 {
            return Err(GatewayError::NotFound {
                table: Table::Folders,
                id: folder_id.to_string(),
            });
        }
        tx.commit().await?;
        debug!(unfiled, deleted, "folder removed");
        Ok(FolderRemoval {
            unfiled,
            folder_deleted: deleted > 0,
        })
    }
}
