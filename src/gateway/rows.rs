//! Typed views over gateway rows.
//!
//! Child records (`CompanyEmail`, `Folder`, ...) decode straight into their
//! domain types; rows whose shape differs from the domain type get a
//! dedicated struct here.

use super::{GatewayResult, Row};
use crate::model::{FileAttachment, Message};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Fixed-width RFC 3339 text, so stored timestamps sort lexically.
pub fn timestamp_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode<T: DeserializeOwned>(row: Row) -> GatewayResult<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> GatewayResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

/// Scalar columns of a company; child collections are fetched separately.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub urgency: Option<String>,
    pub in_progress: Option<String>,
    pub selector: Option<String>,
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub company_id: String,
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub file_mime_type: Option<String>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let file_attachment = match (row.file_name, row.file_url) {
            (Some(name), Some(url)) => Some(FileAttachment {
                name,
                url,
                mime_type: row
                    .file_mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            }),
            _ => None,
        };
        Message {
            id: row.id,
            company_id: row.company_id,
            content: row.content.unwrap_or_default(),
            timestamp: row.timestamp,
            file_attachment,
        }
    }
}

/// Attachment columns for a message write; `None` clears all three.
pub fn attachment_columns(attachment: Option<&FileAttachment>) -> [(&'static str, Value); 3] {
    match attachment {
        Some(f) => [
            ("file_name", Value::from(f.name.as_str())),
            ("file_url", Value::from(f.url.as_str())),
            ("file_mime_type", Value::from(f.mime_type.as_str())),
        ],
        None => [
            ("file_name", Value::Null),
            ("file_url", Value::Null),
            ("file_mime_type", Value::Null),
        ],
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRow {
    pub name: String,
}
