//! Mutation coordinator: every write goes through [`MutationCoordinator::run`].
//!
//! A run validates locally, performs the gateway writes, then invalidates the
//! descriptors the operation declares and emits a notification. On failure
//! nothing is invalidated, a failure notification is emitted and the error is
//! returned so the caller can keep its unsaved input.

use crate::cache::{Descriptor, DescriptorPrefix, QueryCache};
use crate::error::CoreError;
use crate::events::{EventBus, NotificationLevel};
use crate::gateway::rows::{attachment_columns, decode, timestamp_text, MessageRow};
use crate::gateway::{row, Filter, Gateway, Row, Table};
use crate::model::{
    CatalogKind, CompanyId, CompanyPatch, FolderId, FolderPatch, Message, MessageId, MessagePatch,
    NewCompany, NewFolder, NewMessage, UserId,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Child collections a company owns directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Email,
    Phone,
    Contact,
    InProgressState,
}

impl ChildKind {
    fn table(&self) -> Table {
        match self {
            ChildKind::Email => Table::CompanyEmails,
            ChildKind::Phone => Table::CompanyPhones,
            ChildKind::Contact => Table::CompanyContacts,
            ChildKind::InProgressState => Table::CompanyInProgressStates,
        }
    }

    fn value_column(&self) -> &'static str {
        match self {
            ChildKind::Email => "email",
            ChildKind::Phone => "phone",
            ChildKind::Contact => "name",
            ChildKind::InProgressState => "description",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ChildKind::Email => "email",
            ChildKind::Phone => "phone",
            ChildKind::Contact => "contact",
            ChildKind::InProgressState => "in-progress state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateCompany(NewCompany),
    UpdateCompany {
        id: CompanyId,
        patch: CompanyPatch,
    },
    DeleteCompany {
        id: CompanyId,
    },
    AddChild {
        kind: ChildKind,
        company_id: CompanyId,
        value: String,
    },
    DeleteChild {
        kind: ChildKind,
        id: String,
    },
    ReplaceJobPositions {
        company_id: CompanyId,
        titles: Vec<String>,
    },
    AddJobPositionToCompany {
        company_id: CompanyId,
        title: String,
    },
    AddCatalogEntry {
        kind: CatalogKind,
        name: String,
    },
    DeleteCatalogEntry {
        kind: CatalogKind,
        name: String,
    },
    CreateFolder(NewFolder),
    UpdateFolder {
        id: FolderId,
        patch: FolderPatch,
    },
    /// Clears `folder_id` on every member and removes the folder row as one
    /// store write.
    DeleteFolder {
        id: FolderId,
    },
    MoveCompanyToFolder {
        company_id: CompanyId,
        folder_id: Option<FolderId>,
    },
    CreateMessage(NewMessage),
    /// `company_id` names the timeline the caller shows. The company the
    /// stored message belongs to is refreshed as well.
    UpdateMessage {
        id: MessageId,
        company_id: CompanyId,
        patch: MessagePatch,
    },
    DeleteMessage {
        id: MessageId,
        company_id: CompanyId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateCompany(_) => "create_company",
            Operation::UpdateCompany { .. } => "update_company",
            Operation::DeleteCompany { .. } => "delete_company",
            Operation::AddChild { kind, .. } => match kind {
                ChildKind::Email => "add_company_email",
                ChildKind::Phone => "add_company_phone",
                ChildKind::Contact => "add_company_contact",
                ChildKind::InProgressState => "add_company_in_progress_state",
            },
            Operation::DeleteChild { kind, .. } => match kind {
                ChildKind::Email => "delete_company_email",
                ChildKind::Phone => "delete_company_phone",
                ChildKind::Contact => "delete_company_contact",
                ChildKind::InProgressState => "delete_company_in_progress_state",
            },
            Operation::ReplaceJobPositions { .. } => "replace_company_job_positions",
            Operation::AddJobPositionToCompany { .. } => "add_company_job_position",
            Operation::AddCatalogEntry { kind, .. } => match kind {
                CatalogKind::JobPositions => "add_job_position",
                CatalogKind::Selectors => "add_selector",
                CatalogKind::InProgressStates => "add_in_progress_state",
            },
            Operation::DeleteCatalogEntry { kind, .. } => match kind {
                CatalogKind::JobPositions => "delete_job_position",
                CatalogKind::Selectors => "delete_selector",
                CatalogKind::InProgressStates => "delete_in_progress_state",
            },
            Operation::CreateFolder(_) => "create_folder",
            Operation::UpdateFolder { .. } => "update_folder",
            Operation::DeleteFolder { .. } => "delete_folder",
            Operation::MoveCompanyToFolder { .. } => "move_company_to_folder",
            Operation::CreateMessage(_) => "create_message",
            Operation::UpdateMessage { .. } => "update_message",
            Operation::DeleteMessage { .. } => "delete_message",
        }
    }

    /// Descriptors to invalidate after a successful run, as far as the
    /// operation alone tells. A run may add what the store reported.
    pub fn invalidates(&self, user_id: &str) -> Vec<DescriptorPrefix> {
        let companies: DescriptorPrefix = Descriptor::companies(user_id).into();
        let job_catalog: DescriptorPrefix =
            Descriptor::catalog(CatalogKind::JobPositions, user_id).into();
        match self {
            Operation::CreateCompany(_)
            | Operation::UpdateCompany { .. }
            | Operation::ReplaceJobPositions { .. }
            | Operation::AddJobPositionToCompany { .. } => vec![companies, job_catalog],
            Operation::DeleteCompany { id } => {
                vec![companies, Descriptor::messages(id).into()]
            }
            Operation::AddChild { .. }
            | Operation::DeleteChild { .. }
            | Operation::MoveCompanyToFolder { .. } => vec![companies],
            Operation::AddCatalogEntry { kind, .. } => {
                vec![Descriptor::catalog(*kind, user_id).into()]
            }
            // Removing a job position also unlinks it from companies.
            Operation::DeleteCatalogEntry { kind, .. } => match kind {
                CatalogKind::JobPositions => vec![job_catalog, companies],
                _ => vec![Descriptor::catalog(*kind, user_id).into()],
            },
            Operation::CreateFolder(_) | Operation::UpdateFolder { .. } => {
                vec![Descriptor::folders(user_id).into()]
            }
            Operation::DeleteFolder { .. } => vec![Descriptor::folders(user_id).into(), companies],
            Operation::CreateMessage(NewMessage { company_id, .. })
            | Operation::UpdateMessage { company_id, .. }
            | Operation::DeleteMessage { company_id, .. } => {
                vec![Descriptor::messages(company_id).into()]
            }
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Id of the row the operation created, when it created one.
    pub id: Option<String>,
    pub message: String,
    touched: Vec<DescriptorPrefix>,
}

impl Outcome {
    fn done(message: impl Into<String>) -> Self {
        Self {
            id: None,
            message: message.into(),
            touched: Vec::new(),
        }
    }

    fn created(id: String, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            message: message.into(),
            touched: Vec::new(),
        }
    }

    fn touching(mut self, prefix: impl Into<DescriptorPrefix>) -> Self {
        self.touched.push(prefix.into());
        self
    }
}

pub struct MutationCoordinator {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    events: EventBus,
    user_id: UserId,
}

impl MutationCoordinator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: QueryCache,
        events: EventBus,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            gateway,
            cache,
            events,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[instrument(skip_all, fields(op = op.name()))]
    pub async fn run(&self, op: Operation) -> Result<Outcome, CoreError> {
        let name = op.name();
        let mut invalidates = op.invalidates(&self.user_id);
        match self.execute(op).await {
            Ok(outcome) => {
                for prefix in &outcome.touched {
                    if !invalidates.contains(prefix) {
                        invalidates.push(prefix.clone());
                    }
                }
                for prefix in invalidates {
                    self.cache.invalidate(prefix).await;
                }
                info!(op = name, id = ?outcome.id, "mutation succeeded");
                self.events
                    .notify(NotificationLevel::Success, name, outcome.message.clone());
                Ok(outcome)
            }
            Err(err) => {
                if err.is_local() {
                    info!(op = name, %err, "mutation rejected");
                } else {
                    warn!(op = name, %err, "mutation failed");
                }
                let message = match &err {
                    CoreError::Constraint(msg) => msg.clone(),
                    other => format!("Could not {}: {}", name.replace('_', " "), other),
                };
                self.events.notify(NotificationLevel::Failure, name, message);
                Err(err)
            }
        }
    }

    async fn execute(&self, op: Operation) -> Result<Outcome, CoreError> {
        match op {
            Operation::CreateCompany(new) => self.create_company(new).await,
            Operation::UpdateCompany { id, patch } => self.update_company(&id, patch).await,
            Operation::DeleteCompany { id } => self.delete_company(&id).await,
            Operation::AddChild {
                kind,
                company_id,
                value,
            } => {
                let value = required(&value, kind.label())?;
                self.ensure_company(&company_id).await?;
                let stored = self
                    .gateway
                    .insert(
                        kind.table(),
                        row([
                            ("company_id", json!(company_id)),
                            (kind.value_column(), json!(value)),
                        ]),
                    )
                    .await?;
                Ok(Outcome::created(
                    row_id(&stored),
                    format!("Added {} {}", kind.label(), value),
                ))
            }
            Operation::DeleteChild { kind, id } => {
                self.gateway.delete(kind.table(), &id).await?;
                Ok(Outcome::done(format!("Removed {}", kind.label())))
            }
            Operation::ReplaceJobPositions { company_id, titles } => {
                let titles = clean_titles(&titles);
                self.gateway
                    .replace_job_positions_for_company(&company_id, &titles)
                    .await?;
                Ok(Outcome::done("Job positions updated"))
            }
            Operation::AddJobPositionToCompany { company_id, title } => {
                let title = required(&title, "job position")?;
                self.gateway.add_job_position(&company_id, title).await?;
                Ok(Outcome::done(format!("Added job position {title}")))
            }
            Operation::AddCatalogEntry { kind, name } => {
                let name = required(&name, kind.label())?;
                let (stored, created) = self
                    .gateway
                    .upsert_by_name(Table::catalog(kind), &self.user_id, name)
                    .await?;
                let message = if created {
                    format!("Added {} {}", kind.label(), name)
                } else {
                    format!("{} {} already exists", kind.label(), name)
                };
                Ok(Outcome::created(row_id(&stored), message))
            }
            Operation::DeleteCatalogEntry { kind, name } => {
                let table = Table::catalog(kind);
                let rows = self
                    .gateway
                    .list(
                        table,
                        &Filter::new()
                            .eq("user_id", self.user_id.as_str())
                            .eq("name", name.as_str()),
                    )
                    .await?;
                let Some(existing) = rows.first() else {
                    return Err(CoreError::NotFound(format!("{} {}", kind.label(), name)));
                };
                self.gateway.delete(table, &row_id(existing)).await?;
                Ok(Outcome::done(format!("Removed {} {}", kind.label(), name)))
            }
            Operation::CreateFolder(new) => {
                let name = required(&new.name, "folder name")?;
                let stored = self
                    .gateway
                    .insert(
                        Table::Folders,
                        row([
                            ("user_id", json!(self.user_id)),
                            ("name", json!(name)),
                            ("color", json!(new.color)),
                        ]),
                    )
                    .await?;
                Ok(Outcome::created(
                    row_id(&stored),
                    format!("Folder {name} created"),
                ))
            }
            Operation::UpdateFolder { id, patch } => {
                let mut fields = Row::new();
                if let Some(name) = &patch.name {
                    fields.insert("name".into(), json!(required(name, "folder name")?));
                }
                if let Some(color) = patch.color {
                    fields.insert("color".into(), json!(color));
                }
                self.gateway.update(Table::Folders, &id, fields).await?;
                Ok(Outcome::done("Folder updated"))
            }
            Operation::DeleteFolder { id } => self.delete_folder(&id).await,
            Operation::MoveCompanyToFolder {
                company_id,
                folder_id,
            } => {
                self.gateway
                    .update(
                        Table::Companies,
                        &company_id,
                        row([("folder_id", json!(folder_id))]),
                    )
                    .await?;
                Ok(Outcome::done(match folder_id {
                    Some(_) => "Company moved to folder",
                    None => "Company removed from folder",
                }))
            }
            Operation::CreateMessage(new) => self.create_message(new).await,
            Operation::UpdateMessage { id, patch, .. } => self.update_message(&id, patch).await,
            Operation::DeleteMessage { id, .. } => {
                let stored =
                    decode::<MessageRow>(self.gateway.get(Table::Messages, &id).await?)?;
                self.gateway.delete(Table::Messages, &id).await?;
                Ok(Outcome::done("Message deleted")
                    .touching(Descriptor::messages(&stored.company_id)))
            }
        }
    }

    async fn ensure_company(&self, id: &str) -> Result<(), CoreError> {
        self.gateway.get(Table::Companies, id).await?;
        Ok(())
    }

    async fn create_company(&self, new: NewCompany) -> Result<Outcome, CoreError> {
        let name = required(&new.name, "company name")?;
        let fields = row([
            ("user_id", json!(self.user_id)),
            ("name", json!(name)),
            ("urgency", json!(new.urgency.as_str())),
            ("in_progress", json!(blank_to_none(new.in_progress))),
            ("selector", json!(blank_to_none(new.selector))),
            ("folder_id", json!(new.folder_id)),
        ]);
        let stored = self
            .gateway
            .create_company(fields, &clean_titles(&new.job_positions))
            .await?;
        Ok(Outcome::created(
            row_id(&stored),
            format!("Company {name} created"),
        ))
    }

    async fn update_company(&self, id: &str, patch: CompanyPatch) -> Result<Outcome, CoreError> {
        let mut fields = Row::new();
        if let Some(name) = &patch.name {
            fields.insert("name".into(), json!(required(name, "company name")?));
        }
        if let Some(urgency) = patch.urgency {
            fields.insert("urgency".into(), json!(urgency.as_str()));
        }
        if let Some(in_progress) = patch.in_progress {
            fields.insert("in_progress".into(), json!(blank_to_none(in_progress)));
        }
        if let Some(selector) = patch.selector {
            fields.insert("selector".into(), json!(blank_to_none(selector)));
        }
        let titles = patch.job_positions.as_deref().map(clean_titles);
        self.gateway
            .update_company(id, fields, titles.as_deref())
            .await?;
        Ok(Outcome::done("Company updated"))
    }

    async fn delete_company(&self, id: &str) -> Result<Outcome, CoreError> {
        if self.company_count().await? <= 1 {
            return Err(CoreError::constraint(
                "Cannot delete the last remaining company",
            ));
        }
        self.gateway.delete(Table::Companies, id).await?;
        Ok(Outcome::done("Company deleted"))
    }

    /// Count from the cache when it has data, otherwise from the store.
    async fn company_count(&self) -> Result<usize, CoreError> {
        let state = self.cache.fetch(&Descriptor::companies(&self.user_id)).await;
        if let Some(companies) = state.data.as_ref().and_then(|d| d.as_companies()) {
            return Ok(companies.len());
        }
        let rows = self
            .gateway
            .list(
                Table::Companies,
                &Filter::new().eq("user_id", self.user_id.as_str()),
            )
            .await?;
        Ok(rows.len())
    }

    async fn delete_folder(&self, id: &str) -> Result<Outcome, CoreError> {
        let removal = self
            .gateway
            .delete_folder_unfiling_members(&self.user_id, id)
            .await?;
        Ok(Outcome::done(if removal.folder_deleted {
            "Folder deleted"
        } else {
            // Only dangling references were left; repairing them is the job.
            "Folder references cleared"
        }))
    }

    async fn create_message(&self, new: NewMessage) -> Result<Outcome, CoreError> {
        validate_message(&new.content, new.file_attachment.is_some())?;
        self.ensure_company(&new.company_id).await?;
        let timestamp = match new.timestamp {
            Some(ts) => ts,
            None => {
                let now = Utc::now();
                let last = self
                    .gateway
                    .list(
                        Table::Messages,
                        &Filter::new().eq("company_id", new.company_id.as_str()),
                    )
                    .await?
                    .into_iter()
                    .filter_map(|r| decode::<MessageRow>(r).ok())
                    .map(|m| m.timestamp)
                    .max();
                last.map_or(now, |last| last.max(now))
            }
        };
        let mut fields = row([
            ("company_id", json!(new.company_id)),
            ("content", json!(new.content)),
            ("timestamp", json!(timestamp_text(timestamp))),
        ]);
        for (column, value) in attachment_columns(new.file_attachment.as_ref()) {
            fields.insert(column.to_string(), value);
        }
        let stored = self.gateway.insert(Table::Messages, fields).await?;
        Ok(Outcome::created(row_id(&stored), "Message added"))
    }

    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<Outcome, CoreError> {
        let current: Message =
            decode::<MessageRow>(self.gateway.get(Table::Messages, id).await?)?.into();
        let content = patch.content.clone().unwrap_or(current.content);
        let attachment = match patch.file_attachment.clone() {
            Some(next) => next,
            None => current.file_attachment,
        };
        validate_message(&content, attachment.is_some())?;

        let mut fields = Row::new();
        if patch.content.is_some() {
            fields.insert("content".into(), json!(content));
        }
        if patch.file_attachment.is_some() {
            for (column, value) in attachment_columns(attachment.as_ref()) {
                fields.insert(column.to_string(), value);
            }
        }
        self.gateway.update(Table::Messages, id, fields).await?;
        Ok(Outcome::done("Message updated")
            .touching(Descriptor::messages(&current.company_id)))
    }
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

fn validate_message(content: &str, has_attachment: bool) -> Result<(), CoreError> {
    if content.trim().is_empty() && !has_attachment {
        return Err(CoreError::validation(
            "message needs content or a file attachment",
        ));
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Trimmed, non-blank, first occurrence wins.
fn clean_titles(titles: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(titles.len());
    for title in titles {
        let title = title.trim();
        if !title.is_empty() && !out.iter().any(|t| t == title) {
            out.push(title.to_string());
        }
    }
    out
}

fn row_id(row: &Row) -> String {
    row.get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
