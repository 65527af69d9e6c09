//! Persisted entities.
//!
//! Every entity except [`Tenant`] carries a `tenant_id`. Constructors leave it
//! [`TenantId::unassigned`]; the tenant-scoped store stamps the caller's
//! tenant on create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    DocumentId, FeedbackId, MemoryId, MessageId, SessionId, SettingsId, TenantId, UserId,
};
use crate::message::Role;

/// The isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TenantId::new(),
            name: name.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user of exactly one tenant. `hashed_password` holds a sentinel for
/// federated users, who never authenticate with a local credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, hashed_password: impl Into<String>, is_admin: bool) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            tenant_id: TenantId::unassigned(),
            email: email.into(),
            hashed_password: hashed_password.into(),
            is_active: true,
            is_admin,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: UserId, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            tenant_id: TenantId::unassigned(),
            user_id,
            title,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title shown for sessions the user never named.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unnamed Session")
    }
}

/// One transcript entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    /// Structured form of an assistant reply, if one was composed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: SessionId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            tenant_id: TenantId::unassigned(),
            session_id,
            role,
            content: content.into(),
            raw_response: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_raw_response(mut self, raw: serde_json::Value) -> Self {
        self.raw_response = Some(raw);
        self
    }
}

/// Long-term memory written once per successful session reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: MemoryId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub summary: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EpisodicMemory {
    pub fn new(user_id: UserId, session_id: SessionId, summary: impl Into<String>) -> Self {
        Self {
            id: MemoryId::new(),
            tenant_id: TenantId::unassigned(),
            user_id,
            session_id,
            summary: summary.into(),
            decisions: Vec::new(),
            assumptions: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A keyed JSON fact, scoped by (tenant, optional user, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMemory {
    pub id: MemoryId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub key: String,
    pub value: serde_json::Value,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StructuredMemory {
    pub fn new(key: impl Into<String>, value: serde_json::Value, user_id: Option<UserId>) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            tenant_id: TenantId::unassigned(),
            user_id,
            key: key.into(),
            value,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Metadata for ingested reference material, paired 1:1 with an index entry
/// whose document id equals `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    /// Set when the document was ingested into a session's ephemeral index.
    pub session_id: Option<SessionId>,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub uploaded_by: UserId,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ── Feedback ─────────────────────────────────────────────────────────────

/// A user's rating of a reply: -1 thumbs down, 0 unrated, 1 thumbs up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    pub message_id: Option<MessageId>,
    pub rating: i8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feedback {
    pub const MIN_RATING: i8 = -1;
    pub const MAX_RATING: i8 = 1;
    /// Longest accepted comment, in characters.
    pub const MAX_COMMENT_CHARS: usize = 1000;

    pub fn new(user_id: UserId, rating: i8) -> Self {
        let now = Utc::now();
        Self {
            id: FeedbackId::new(),
            tenant_id: TenantId::unassigned(),
            user_id,
            session_id: None,
            message_id: None,
            rating,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── User settings ────────────────────────────────────────────────────────

macro_rules! setting_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{other}'", stringify!($name))),
                }
            }
        }
    };
}

setting_enum!(
    /// UI color scheme.
    Theme { Light => "light", Dark => "dark" } default Light
);
setting_enum!(
    /// UI language.
    Language { Ja => "ja", En => "en" } default Ja
);
setting_enum!(FontSize { Small => "small", Medium => "medium", Large => "large" } default Medium);

/// Per-user UI preferences. At most one row per (tenant, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: SettingsId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub theme: Theme,
    pub language: Language,
    pub font_size: FontSize,
    pub llm_profile: Option<String>,
    pub has_seen_onboarding: bool,
    pub onboarding_skipped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSettings {
    /// Defaults for `user_id`, not yet stored.
    pub fn defaults_for(tenant_id: TenantId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: SettingsId::unsaved(),
            tenant_id,
            user_id,
            theme: Theme::default(),
            language: Language::default(),
            font_size: FontSize::default(),
            llm_profile: None,
            has_seen_onboarding: false,
            onboarding_skipped: false,
            created_at: now,
            updated_at: now,
        }
    }
}
