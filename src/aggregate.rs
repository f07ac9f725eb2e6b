//! Company aggregate builder and the gateway-backed cache fetcher.
//!
//! A company is one row plus five child collections. For each company the
//! five reads run concurrently; all companies are assembled concurrently. A
//! failed child read degrades to an empty collection so one broken list never
//! hides the company itself.

use crate::cache::{Descriptor, Fetcher, QueryData};
use crate::error::CoreError;
use crate::gateway::rows::{decode_all, CatalogRow, CompanyRow, MessageRow};
use crate::gateway::{decode, Filter, Gateway, GatewayResult, Table};
use crate::model::{
    CatalogKind, Company, CompanyContact, CompanyEmail, CompanyPhone, Folder, InProgressEntry,
    Message, Urgency,
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct AggregateBuilder {
    gateway: Arc<dyn Gateway>,
}

impl AggregateBuilder {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Companies owned by `user_id`, most recently created first.
    #[instrument(skip(self))]
    pub async fn companies_for_user(&self, user_id: &str) -> Result<Vec<Company>, CoreError> {
        let rows = self
            .gateway
            .list(Table::Companies, &Filter::new().eq("user_id", user_id))
            .await?;
        let rows: Vec<CompanyRow> = rows
            .into_iter()
            .filter_map(|row| match decode::<CompanyRow>(row) {
                Ok(r) => Some(r),
                Err(err) => {
                    warn!(%err, "skipping undecodable company row");
                    None
                }
            })
            .collect();
        let companies = join_all(rows.into_iter().map(|row| self.assemble(row))).await;
        debug!(count = companies.len(), "assembled companies");
        Ok(companies)
    }

    async fn assemble(&self, row: CompanyRow) -> Company {
        let id = row.id.as_str();
        let (job_positions, emails, phones, contacts, in_progress_states) = tokio::join!(
            self.gateway.list_job_positions_for_company(id),
            self.children::<CompanyEmail>(Table::CompanyEmails, id),
            self.children::<CompanyPhone>(Table::CompanyPhones, id),
            self.children::<CompanyContact>(Table::CompanyContacts, id),
            self.children::<InProgressEntry>(Table::CompanyInProgressStates, id),
        );

        let urgency = normalize_urgency(id, row.urgency.as_deref());
        Company {
            job_positions: or_empty(id, "job_positions", job_positions)
                .into_iter()
                .collect(),
            emails: or_empty(id, "emails", emails),
            phones: or_empty(id, "phones", phones),
            contacts: or_empty(id, "contacts", contacts),
            in_progress_states: or_empty(id, "in_progress_states", in_progress_states),
            urgency,
            in_progress: row.in_progress.filter(|s| !s.trim().is_empty()),
            selector: row.selector.filter(|s| !s.trim().is_empty()),
            folder_id: row.folder_id.filter(|s| !s.is_empty()),
            name: row.name,
            created_at: row.created_at,
            id: row.id,
        }
    }

    async fn children<T: DeserializeOwned>(
        &self,
        table: Table,
        company_id: &str,
    ) -> GatewayResult<Vec<T>> {
        let rows = self
            .gateway
            .list(table, &Filter::new().eq("company_id", company_id))
            .await?;
        decode_all(rows)
    }

    pub async fn messages_for_company(&self, company_id: &str) -> Result<Vec<Message>, CoreError> {
        let rows = self
            .gateway
            .list(Table::Messages, &Filter::new().eq("company_id", company_id))
            .await?;
        let rows: Vec<MessageRow> = decode_all(rows)?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn folders_for_user(&self, user_id: &str) -> Result<Vec<Folder>, CoreError> {
        let rows = self
            .gateway
            .list(Table::Folders, &Filter::new().eq("user_id", user_id))
            .await?;
        Ok(decode_all(rows)?)
    }

    /// Deduplicated, alphabetically ordered catalog entries.
    pub async fn catalog(&self, kind: CatalogKind, user_id: &str) -> Result<Vec<String>, CoreError> {
        let rows = self
            .gateway
            .list(Table::catalog(kind), &Filter::new().eq("user_id", user_id))
            .await?;
        let rows: Vec<CatalogRow> = decode_all(rows)?;
        let mut names: Vec<String> = rows.into_iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[async_trait]
impl Fetcher for AggregateBuilder {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<QueryData, CoreError> {
        match descriptor {
            Descriptor::Companies { user_id } => {
                self.companies_for_user(user_id).await.map(QueryData::Companies)
            }
            Descriptor::Messages { company_id } => self
                .messages_for_company(company_id)
                .await
                .map(QueryData::Messages),
            Descriptor::Folders { user_id } => {
                self.folders_for_user(user_id).await.map(QueryData::Folders)
            }
            Descriptor::Catalog { kind, user_id } => {
                self.catalog(*kind, user_id).await.map(QueryData::Catalog)
            }
        }
    }
}

fn or_empty<T>(company_id: &str, field: &'static str, result: GatewayResult<Vec<T>>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(err) => {
            warn!(company_id, field, %err, "child fetch failed; substituting empty collection");
            Vec::new()
        }
    }
}

/// Missing or unrecognised values fall back to the default urgency.
fn normalize_urgency(company_id: &str, raw: Option<&str>) -> Urgency {
    match raw {
        None => Urgency::default(),
        Some(s) if s.trim().is_empty() => Urgency::default(),
        Some(s) => Urgency::parse(s).unwrap_or_else(|| {
            warn!(company_id, urgency = s, "unknown urgency; using default");
            Urgency::default()
        }),
    }
}
