//! Compile-time entity descriptions.
//!
//! Each persisted type describes its table, its columns (primary key first),
//! the column that carries its tenant, and how to encode/decode a row. The
//! generic [`Store`](crate::Store) builds every statement from these.

use chrono::{DateTime, SecondsFormat, Utc};
use domgate_core::error::StoreError;
use domgate_core::{
    ChatMessage, ChatSession, EpisodicMemory, Feedback, KnowledgeDocument, Role, StructuredMemory,
    Tenant, TenantId, User, UserSettings,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// A bindable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    OptText(Option<String>),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        Value::OptText(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that lexical
/// order equals chronological order.
pub fn timestamp(dt: &DateTime<Utc>) -> Value {
    Value::Text(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn json<T: Serialize>(table: &'static str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_string(value)
        .map(Value::Text)
        .map_err(|e| StoreError::Decode {
            table,
            reason: format!("JSON encoding: {e}"),
        })
}

/// Description of a persisted type.
pub trait Entity: Sized + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    /// Human-readable name used in "not found" errors.
    const NAME: &'static str;
    /// Column names in [`Entity::values`] order; the first is the primary key.
    const COLUMNS: &'static [&'static str];
    /// Column holding the owning tenant. `None` for entities outside tenancy.
    const TENANT_COLUMN: Option<&'static str>;
    /// Rows that must never change once written.
    const IMMUTABLE: bool = false;

    fn id(&self) -> &str;
    fn tenant_id(&self) -> Option<&TenantId>;
    fn set_tenant_id(&mut self, tenant: TenantId);
    fn values(&self) -> Result<Vec<Value>, StoreError>;
    fn from_row(row: &SqliteRow) -> Result<Self, StoreError>;
}

/// Entities that identity bootstrap may read and write without a tenant
/// bound. Only these can be opened with [`Database::system`](crate::Database::system).
pub trait SystemScoped: Entity {}

/// Column reader that tags decode failures with the table name.
pub(crate) struct RowReader<'r> {
    row: &'r SqliteRow,
    table: &'static str,
}

impl<'r> RowReader<'r> {
    pub(crate) fn new<E: Entity>(row: &'r SqliteRow) -> Self {
        Self { row, table: E::TABLE }
    }

    fn decode_err(&self, column: &str, e: impl std::fmt::Display) -> StoreError {
        StoreError::Decode {
            table: self.table,
            reason: format!("{column} column: {e}"),
        }
    }

    pub(crate) fn text(&self, column: &str) -> Result<String, StoreError> {
        self.row.try_get(column).map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn opt_text(&self, column: &str) -> Result<Option<String>, StoreError> {
        self.row.try_get(column).map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn int(&self, column: &str) -> Result<i64, StoreError> {
        self.row.try_get(column).map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn flag(&self, column: &str) -> Result<bool, StoreError> {
        self.row.try_get(column).map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn timestamp(&self, column: &str) -> Result<DateTime<Utc>, StoreError> {
        let raw = self.text(column)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| self.decode_err(column, e))
    }

    /// Text column parsed through `FromStr`.
    pub(crate) fn parsed<T: std::str::FromStr<Err = String>>(&self, column: &str) -> Result<T, StoreError> {
        self.text(column)?.parse().map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn json<T: DeserializeOwned>(&self, column: &str) -> Result<T, StoreError> {
        let raw = self.text(column)?;
        serde_json::from_str(&raw).map_err(|e| self.decode_err(column, e))
    }

    pub(crate) fn opt_json<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>, StoreError> {
        match self.opt_text(column)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| self.decode_err(column, e)),
            None => Ok(None),
        }
    }
}

// ── Tenancy ──────────────────────────────────────────────────────────────

/// A tenant "belongs" to itself: a tenant-bound store of tenants sees only
/// the caller's own row.
impl Entity for Tenant {
    const TABLE: &'static str = "tenants";
    const NAME: &'static str = "Tenant";
    const COLUMNS: &'static [&'static str] = &["id", "name", "is_active", "created_at", "updated_at"];
    const TENANT_COLUMN: Option<&'static str> = Some("id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.name.clone().into(),
            self.is_active.into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            name: r.text("name")?,
            is_active: r.flag("is_active")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl SystemScoped for Tenant {}

impl Entity for User {
    const TABLE: &'static str = "users";
    const NAME: &'static str = "User";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "email",
        "hashed_password",
        "is_active",
        "is_admin",
        "created_at",
        "updated_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.email.clone().into(),
            self.hashed_password.clone().into(),
            self.is_active.into(),
            self.is_admin.into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            email: r.text("email")?,
            hashed_password: r.text("hashed_password")?,
            is_active: r.flag("is_active")?,
            is_admin: r.flag("is_admin")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl SystemScoped for User {}

// ── Conversation ─────────────────────────────────────────────────────────

impl Entity for ChatSession {
    const TABLE: &'static str = "chat_sessions";
    const NAME: &'static str = "ChatSession";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "user_id",
        "title",
        "is_active",
        "created_at",
        "updated_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.user_id.as_str().into(),
            self.title.clone().into(),
            self.is_active.into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            user_id: r.text("user_id")?.into(),
            title: r.opt_text("title")?,
            is_active: r.flag("is_active")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl Entity for ChatMessage {
    const TABLE: &'static str = "chat_messages";
    const NAME: &'static str = "ChatMessage";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "session_id",
        "role",
        "content",
        "raw_response",
        "created_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");
    const IMMUTABLE: bool = true;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        let raw = self
            .raw_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Decode {
                table: Self::TABLE,
                reason: format!("JSON encoding: {e}"),
            })?;
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.session_id.as_str().into(),
            self.role.as_str().into(),
            self.content.clone().into(),
            raw.into(),
            timestamp(&self.created_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        let role: Role = r.text("role")?.parse().map_err(|reason| StoreError::Decode {
            table: Self::TABLE,
            reason,
        })?;
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            session_id: r.text("session_id")?.into(),
            role,
            content: r.text("content")?,
            raw_response: r.opt_json("raw_response")?,
            created_at: r.timestamp("created_at")?,
        })
    }
}

// ── Memory ───────────────────────────────────────────────────────────────

impl Entity for EpisodicMemory {
    const TABLE: &'static str = "episodic_memories";
    const NAME: &'static str = "EpisodicMemory";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "user_id",
        "session_id",
        "summary",
        "decisions",
        "assumptions",
        "created_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");
    const IMMUTABLE: bool = true;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.user_id.as_str().into(),
            self.session_id.as_str().into(),
            self.summary.clone().into(),
            json(Self::TABLE, &self.decisions)?,
            json(Self::TABLE, &self.assumptions)?,
            timestamp(&self.created_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            user_id: r.text("user_id")?.into(),
            session_id: r.text("session_id")?.into(),
            summary: r.text("summary")?,
            decisions: r.json("decisions")?,
            assumptions: r.json("assumptions")?,
            created_at: r.timestamp("created_at")?,
        })
    }
}

impl Entity for StructuredMemory {
    const TABLE: &'static str = "structured_memories";
    const NAME: &'static str = "StructuredMemory";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "user_id",
        "key",
        "value",
        "description",
        "created_at",
        "updated_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.user_id.as_ref().map(|u| u.to_string()).into(),
            self.key.clone().into(),
            json(Self::TABLE, &self.value)?,
            self.description.clone().into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            user_id: r.opt_text("user_id")?.map(Into::into),
            key: r.text("key")?,
            value: r.json("value")?,
            description: r.opt_text("description")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

// ── Knowledge ────────────────────────────────────────────────────────────

impl Entity for KnowledgeDocument {
    const TABLE: &'static str = "knowledge_documents";
    const NAME: &'static str = "KnowledgeDocument";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "session_id",
        "file_name",
        "file_path",
        "file_type",
        "file_size",
        "uploaded_by",
        "is_active",
        "created_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        let size = i64::try_from(self.file_size).map_err(|_| StoreError::Decode {
            table: Self::TABLE,
            reason: format!("file_size {} out of range", self.file_size),
        })?;
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.session_id.as_ref().map(|s| s.to_string()).into(),
            self.file_name.clone().into(),
            self.file_path.clone().into(),
            self.file_type.clone().into(),
            size.into(),
            self.uploaded_by.as_str().into(),
            self.is_active.into(),
            timestamp(&self.created_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        let size = r.int("file_size")?;
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            session_id: r.opt_text("session_id")?.map(Into::into),
            file_name: r.text("file_name")?,
            file_path: r.text("file_path")?,
            file_type: r.text("file_type")?,
            file_size: u64::try_from(size).unwrap_or_default(),
            uploaded_by: r.text("uploaded_by")?.into(),
            is_active: r.flag("is_active")?,
            created_at: r.timestamp("created_at")?,
        })
    }
}

// ── Feedback and preferences ─────────────────────────────────────────────

impl Entity for Feedback {
    const TABLE: &'static str = "feedback";
    const NAME: &'static str = "Feedback";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "user_id",
        "session_id",
        "message_id",
        "rating",
        "comment",
        "created_at",
        "updated_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.user_id.as_str().into(),
            self.session_id.as_ref().map(|s| s.to_string()).into(),
            self.message_id.as_ref().map(|m| m.to_string()).into(),
            i64::from(self.rating).into(),
            self.comment.clone().into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        let rating = r.int("rating")?;
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            user_id: r.text("user_id")?.into(),
            session_id: r.opt_text("session_id")?.map(Into::into),
            message_id: r.opt_text("message_id")?.map(Into::into),
            rating: i8::try_from(rating).map_err(|_| StoreError::Decode {
                table: Self::TABLE,
                reason: format!("rating {rating} out of range"),
            })?,
            comment: r.opt_text("comment")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl Entity for UserSettings {
    const TABLE: &'static str = "user_settings";
    const NAME: &'static str = "UserSettings";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "tenant_id",
        "user_id",
        "theme",
        "language",
        "font_size",
        "llm_profile",
        "has_seen_onboarding",
        "onboarding_skipped",
        "created_at",
        "updated_at",
    ];
    const TENANT_COLUMN: Option<&'static str> = Some("tenant_id");

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        Some(&self.tenant_id)
    }

    fn set_tenant_id(&mut self, tenant: TenantId) {
        self.tenant_id = tenant;
    }

    fn values(&self) -> Result<Vec<Value>, StoreError> {
        Ok(vec![
            self.id.as_str().into(),
            self.tenant_id.as_str().into(),
            self.user_id.as_str().into(),
            self.theme.as_str().into(),
            self.language.as_str().into(),
            self.font_size.as_str().into(),
            self.llm_profile.clone().into(),
            self.has_seen_onboarding.into(),
            self.onboarding_skipped.into(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let r = RowReader::new::<Self>(row);
        Ok(Self {
            id: r.text("id")?.into(),
            tenant_id: r.text("tenant_id")?.into(),
            user_id: r.text("user_id")?.into(),
            theme: r.parsed("theme")?,
            language: r.parsed("language")?,
            font_size: r.parsed("font_size")?,
            llm_profile: r.opt_text("llm_profile")?,
            has_seen_onboarding: r.flag("has_seen_onboarding")?,
            onboarding_skipped: r.flag("onboarding_skipped")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shape<E: Entity>(sample: &E) {
        let values = sample.values().unwrap();
        assert_eq!(values.len(), E::COLUMNS.len(), "{} column count", E::TABLE);
        assert_eq!(E::COLUMNS[0], "id");
        if let Some(col) = E::TENANT_COLUMN {
            assert!(E::COLUMNS.contains(&col));
        }
    }

    #[test]
    fn every_entity_encodes_one_value_per_column() {
        let user = User::new("a@example.com", "x", false);
        assert_shape(&Tenant::new("acme"));
        assert_shape(&user);
        assert_shape(&ChatSession::new(user.id.clone(), None));
        assert_shape(&ChatMessage::new(domgate_core::SessionId::new(), Role::User, "hi"));
        assert_shape(&EpisodicMemory::new(user.id.clone(), domgate_core::SessionId::new(), "s"));
        assert_shape(&StructuredMemory::new("k", serde_json::json!({"a": 1}), None));
        assert_shape(&Feedback::new(user.id.clone(), 1));
        assert_shape(&UserSettings::defaults_for(TenantId::new(), user.id.clone()));
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc);
        let (Value::Text(a), Value::Text(b)) = (timestamp(&a), timestamp(&b)) else {
            panic!("timestamps encode as text");
        };
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
