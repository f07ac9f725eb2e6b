#![allow(dead_code)]

use jobhunt_crm::gateway::{
    Filter, FolderRemoval, Gateway, GatewayError, GatewayResult, Row, SqliteGateway, Table,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// One gateway call as seen by the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: &'static str,
    pub table: Option<Table>,
    pub id: Option<String>,
    pub fields: Option<Row>,
}

/// Wraps a real in-memory store, records every call and can fail on demand.
#[derive(Clone)]
pub struct RecordingGateway {
    inner: Arc<SqliteGateway>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_writes: Arc<AtomicBool>,
    failing_lists: Arc<Mutex<HashSet<Table>>>,
    failing_verbs: Arc<Mutex<HashSet<&'static str>>>,
    list_gates: Arc<Mutex<HashMap<Table, Arc<Notify>>>>,
}

impl RecordingGateway {
    pub async fn new() -> Self {
        Self {
            inner: Arc::new(SqliteGateway::in_memory().await.unwrap()),
            calls: Arc::default(),
            fail_writes: Arc::default(),
            failing_lists: Arc::default(),
            failing_verbs: Arc::default(),
            list_gates: Arc::default(),
        }
    }

    pub fn store(&self) -> &SqliteGateway {
        &self.inner
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    pub async fn count(&self, verb: &str, table: Table) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.verb == verb && c.table == Some(table))
            .count()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn fail_list(&self, table: Table) {
        self.failing_lists.lock().await.insert(table);
    }

    /// Makes every call recorded as `verb` fail.
    pub async fn fail_verb(&self, verb: &'static str) {
        self.failing_verbs.lock().await.insert(verb);
    }

    /// Lists of `table` read their rows, then wait until released.
    pub async fn hold_lists(&self, table: Table) {
        self.list_gates
            .lock()
            .await
            .insert(table, Arc::new(Notify::new()));
    }

    /// Lets the waiting list of `table` finish and stops holding new ones.
    pub async fn release_lists(&self, table: Table) {
        if let Some(gate) = self.list_gates.lock().await.remove(&table) {
            gate.notify_one();
        }
    }

    async fn record(&self, verb: &'static str, table: Option<Table>, id: Option<&str>, fields: Option<&Row>) {
        self.calls.lock().await.push(Call {
            verb,
            table,
            id: id.map(str::to_string),
            fields: fields.cloned(),
        });
    }

    async fn check_write(&self, verb: &str) -> GatewayResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("injected write failure".into()));
        }
        if self.failing_verbs.lock().await.contains(verb) {
            return Err(GatewayError::Unavailable(format!("{verb} down")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Gateway for RecordingGateway {
    async fn list(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>> {
        self.record("list", Some(table), None, None).await;
        if self.failing_lists.lock().await.contains(&table) {
            return Err(GatewayError::Unavailable(format!("{table} list down")));
        }
        let rows = self.inner.list(table, filter).await?;
        let gate = self.list_gates.lock().await.get(&table).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(rows)
    }

    async fn get(&self, table: Table, id: &str) -> GatewayResult<Row> {
        self.record("get", Some(table), Some(id), None).await;
        self.inner.get(table, id).await
    }

    async fn insert(&self, table: Table, fields: Row) -> GatewayResult<Row> {
        self.record("insert", Some(table), None, Some(&fields)).await;
        self.check_write("insert").await?;
        self.inner.insert(table, fields).await
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> GatewayResult<()> {
        self.record("update", Some(table), Some(id), Some(&fields)).await;
        self.check_write("update").await?;
        self.inner.update(table, id, fields).await
    }

    async fn delete(&self, table: Table, id: &str) -> GatewayResult<()> {
        self.record("delete", Some(table), Some(id), None).await;
        self.check_write("delete").await?;
        self.inner.delete(table, id).await
    }

    async fn upsert_by_name(&self, table: Table, user_id: &str, name: &str) -> GatewayResult<(Row, bool)> {
        self.record("upsert", Some(table), None, None).await;
        self.check_write("upsert").await?;
        self.inner.upsert_by_name(table, user_id, name).await
    }

    async fn list_job_positions_for_company(&self, company_id: &str) -> GatewayResult<Vec<String>> {
        self.record("list_job_positions", None, Some(company_id), None).await;
        self.inner.list_job_positions_for_company(company_id).await
    }

    async fn replace_job_positions_for_company(&self, company_id: &str, titles: &[String]) -> GatewayResult<()> {
        self.record("replace_job_positions", None, Some(company_id), None).await;
        self.check_write("replace_job_positions").await?;
        self.inner.replace_job_positions_for_company(company_id, titles).await
    }

    async fn add_job_position(&self, company_id: &str, title: &str) -> GatewayResult<()> {
        self.record("add_job_position", None, Some(company_id), None).await;
        self.check_write("add_job_position").await?;
        self.inner.add_job_position(company_id, title).await
    }

    async fn create_company(&self, fields: Row, job_positions: &[String]) -> GatewayResult<Row> {
        self.record("create_company", Some(Table::Companies), None, Some(&fields)).await;
        self.check_write("create_company").await?;
        self.inner.create_company(fields, job_positions).await
    }

    async fn update_company(&self, id: &str, fields: Row, job_positions: Option<&[String]>) -> GatewayResult<()> {
        self.record("update_company", Some(Table::Companies), Some(id), Some(&fields)).await;
        self.check_write("update_company").await?;
        self.inner.update_company(id, fields, job_positions).await
    }

    async fn delete_folder_unfiling_members(&self, user_id: &str, folder_id: &str) -> GatewayResult<FolderRemoval> {
        self.record("delete_folder", Some(Table::Folders), Some(folder_id), None).await;
        self.check_write("delete_folder").await?;
        self.inner.delete_folder_unfiling_members(user_id, folder_id).await
    }
}
