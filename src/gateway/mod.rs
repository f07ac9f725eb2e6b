//! Remote data gateway: the row-based contract the core uses to reach the
//! persistence store.
//!
//! The trait is deliberately untyped (rows are JSON objects keyed by column
//! name) so every table shares the same five CRUD verbs. Typed decoding of
//! rows lives in `rows`; the SQLite-backed implementation lives in `sqlite`.

pub mod rows;
pub mod sqlite;

use crate::model::CatalogKind;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use rows::decode;
pub use sqlite::SqliteGateway;

/// A store row: column name to value. Absent optional columns are `Null`.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Companies,
    CompanyEmails,
    CompanyPhones,
    CompanyContacts,
    CompanyInProgressStates,
    Messages,
    Folders,
    JobPositions,
    Selectors,
    InProgressStates,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Companies => "companies",
            Table::CompanyEmails => "company_emails",
            Table::CompanyPhones => "company_phones",
            Table::CompanyContacts => "company_contacts",
            Table::CompanyInProgressStates => "company_in_progress_states",
            Table::Messages => "messages",
            Table::Folders => "folders",
            Table::JobPositions => "job_positions",
            Table::Selectors => "selectors",
            Table::InProgressStates => "in_progress_states",
        }
    }

    /// Every column of the table. Writes naming any other column are rejected.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Companies => &[
                "id",
                "user_id",
                "name",
                "urgency",
                "in_progress",
                "selector",
                "folder_id",
                "created_at",
            ],
            Table::CompanyEmails => &["id", "company_id", "email", "created_at"],
            Table::CompanyPhones => &["id", "company_id", "phone", "created_at"],
            Table::CompanyContacts => &["id", "company_id", "name", "created_at"],
            Table::CompanyInProgressStates => &["id", "company_id", "description", "created_at"],
            Table::Messages => &[
                "id",
                "company_id",
                "content",
                "timestamp",
                "file_name",
                "file_url",
                "file_mime_type",
                "created_at",
            ],
            Table::Folders => &["id", "user_id", "name", "color", "created_at"],
            Table::JobPositions | Table::Selectors | Table::InProgressStates => {
                &["id", "user_id", "name", "created_at"]
            }
        }
    }

    /// Global vocabularies keyed by `(user_id, name)`.
    pub fn is_catalog(&self) -> bool {
        matches!(
            self,
            Table::JobPositions | Table::Selectors | Table::InProgressStates
        )
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    pub fn catalog(kind: CatalogKind) -> Self {
        match kind {
            CatalogKind::JobPositions => Table::JobPositions,
            CatalogKind::Selectors => Table::Selectors,
            CatalogKind::InProgressStates => Table::InProgressStates,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality filter for `list`. A `Null` value matches `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub eq: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.eq.push((column.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{table} row {id} not found")]
    NotFound { table: Table, id: String },
    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: Table, column: String },
    #[error("operation not supported on {0}")]
    Unsupported(Table),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>>;

    async fn get(&self, table: Table, id: &str) -> GatewayResult<Row>;

    /// Inserts a row and returns it as stored (with generated `id` and
    /// `created_at` when the caller left them out).
    async fn insert(&self, table: Table, fields: Row) -> GatewayResult<Row>;

    async fn update(&self, table: Table, id: &str, fields: Row) -> GatewayResult<()>;

    async fn delete(&self, table: Table, id: &str) -> GatewayResult<()>;

    /// Idempotent insert into a global catalog keyed by `(user_id, name)`.
    /// Returns the stored row and whether it was newly created.
    async fn upsert_by_name(
        &self,
        table: Table,
        user_id: &str,
        name: &str,
    ) -> GatewayResult<(Row, bool)>;

    /// Job position titles linked to a company, in link order.
    async fn list_job_positions_for_company(&self, company_id: &str) -> GatewayResult<Vec<String>>;

    /// Drops every link of the company, then links each title in turn.
    async fn replace_job_positions_for_company(
        &self,
        company_id: &str,
        titles: &[String],
    ) -> GatewayResult<()>;

    async fn add_job_position(&self, company_id: &str, title: &str) -> GatewayResult<()>;

    /// Inserts a company row and links `job_positions` to it as one unit.
    /// Nothing is stored when any part fails.
    async fn create_company(&self, fields: Row, job_positions: &[String]) -> GatewayResult<Row>;

    /// Updates a company row and, when given, replaces its job-position
    /// links as one unit. An empty `fields` still reports a missing company.
    async fn update_company(
        &self,
        id: &str,
        fields: Row,
        job_positions: Option<&[String]>,
    ) -> GatewayResult<()>;

    /// Clears `folder_id` on every company of `user_id` filed under the
    /// folder, then removes the folder row, as one unit. A missing folder
    /// row is only an error when no company referenced it.
    async fn delete_folder_unfiling_members(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> GatewayResult<FolderRemoval>;
}

/// What [`Gateway::delete_folder_unfiling_members`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderRemoval {
    pub unfiled: u64,
    pub folder_deleted: bool,
}

/// Builds a [`Row`] from `(column, value)` pairs.
pub fn row<I, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}
