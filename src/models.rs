//! Row structs for every tenant-scoped table.
//!
//! Every query against these tables returns one of these explicit structs
//! (Design Note: "Duck-typed records from the store" is replaced by explicit
//! row structs everywhere; there is no dynamic row type in the persistence
//! layer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tenant account. The core does not issue sessions; this row exists only
/// to satisfy the foreign key every tenant-scoped table carries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "source_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Gmail,
    Outlook,
    Mbox,
    Pst,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "source_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// An ingestion source (one uploaded MBOX file, one Gmail/Outlook/PST/API
/// import run). Owns its messages, recipients, and attachments; deleting a
/// source cascades to all three plus the vectors keyed by its messages.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub file_name: Option<String>,
    pub status: SourceStatus,
    pub expected: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub included_in_search: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// `status=completed` implies `succeeded+failed >= expected && expected>0`.
    pub fn completion_invariant_holds(&self) -> bool {
        if self.status != SourceStatus::Completed {
            return true;
        }
        self.expected > 0 && self.succeeded + self.failed >= self.expected
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub id: i64,
    pub tenant_id: i64,
    pub domain: String,
    pub name: Option<String>,
    pub total_emails: i64,
    pub first_contact: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub tenant_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub company_id: Option<i64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub email_count: i64,
}

/// A single message row. External `message_id` is unique per tenant;
/// re-ingesting the same `message_id` is a no-op (§4.3 step 4).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub tenant_id: i64,
    pub source_id: Option<i64>,
    pub message_id: String,
    pub thread_id: Option<i64>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub from_contact_id: i64,
    pub has_attachments: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipient_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipient {
    pub message_id: i64,
    pub contact_id: i64,
    pub role: RecipientRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub blob_key: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    /// `<tenant_id>/<message_id>/<attachment_id>/<filename>`.
    pub fn blob_key(tenant_id: i64, message_id: i64, attachment_id: i64, filename: &str) -> String {
        format!("{tenant_id}/{message_id}/{attachment_id}/{filename}")
    }
}
