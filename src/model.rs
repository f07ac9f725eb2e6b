//! Domain entities exposed by the core's read model, plus the inputs accepted
//! by mutations.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type UserId = String;
pub type CompanyId = String;
pub type FolderId = String;
pub type MessageId = String;

/// The three user-wide vocabularies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    JobPositions,
    Selectors,
    InProgressStates,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::JobPositions => "job_positions",
            CatalogKind::Selectors => "selectors",
            CatalogKind::InProgressStates => "in_progress_states",
        }
    }

    /// Singular label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            CatalogKind::JobPositions => "job position",
            CatalogKind::Selectors => "selector",
            CatalogKind::InProgressStates => "in-progress state",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    /// Canonical spelling written to the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }

    /// Accepts the canonical spelling and the legacy Portuguese labels
    /// (`Baixa`, `Média`, `Alta`), ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" | "baixa" => Some(Urgency::Low),
            "medium" | "média" | "media" => Some(Urgency::Medium),
            "high" | "alta" => Some(Urgency::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyEmail {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyPhone {
    pub id: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyContact {
    pub id: String,
    pub name: String,
}

/// One entry of a company's own in-progress sub-state list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InProgressEntry {
    pub id: String,
    pub description: String,
}

/// Company aggregate assembled from the company row and its child
/// collections. Never mutated in place; a refetch replaces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub job_positions: BTreeSet<String>,
    pub urgency: Urgency,
    pub in_progress: Option<String>,
    pub selector: Option<String>,
    pub in_progress_states: Vec<InProgressEntry>,
    pub emails: Vec<CompanyEmail>,
    pub phones: Vec<CompanyPhone>,
    pub contacts: Vec<CompanyContact>,
    pub folder_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn has_in_progress_states(&self) -> bool {
        !self.in_progress_states.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub company_id: CompanyId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub file_attachment: Option<FileAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub color: Option<String>,
    pub user_id: UserId,
}

/// Structured predicates for the filter engine. Every `None`/empty/false
/// field is inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub job_positions: Vec<String>,
    pub urgency: Option<Urgency>,
    pub in_progress_state: Option<String>,
    pub has_in_progress: bool,
    pub selector: Option<String>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.job_positions.is_empty()
            && self.urgency.is_none()
            && self.in_progress_state.is_none()
            && !self.has_in_progress
            && self.selector.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCompany {
    pub name: String,
    pub urgency: Urgency,
    pub job_positions: Vec<String>,
    pub in_progress: Option<String>,
    pub selector: Option<String>,
    pub folder_id: Option<FolderId>,
}

/// Partial company update. Outer `None` leaves a field untouched; for the
/// nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub urgency: Option<Urgency>,
    pub in_progress: Option<Option<String>>,
    pub selector: Option<Option<String>>,
    pub job_positions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFolder {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderPatch {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub company_id: CompanyId,
    pub content: String,
    /// Explicit timestamp override; when absent the coordinator assigns one
    /// that keeps the company's message timeline non-decreasing.
    pub timestamp: Option<DateTime<Utc>>,
    pub file_attachment: Option<FileAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub file_attachment: Option<Option<FileAttachment>>,
}
