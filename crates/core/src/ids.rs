//! Identifier newtypes.
//!
//! Every entity key is a UUID string wrapped in its own type so a session id
//! can never be passed where a tenant id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type!(
    /// Tenant primary key.
    TenantId
);
id_type!(UserId);
id_type!(SessionId);
id_type!(MessageId);
id_type!(MemoryId);
id_type!(DocumentId);
id_type!(FeedbackId);
id_type!(
    /// Key of a stored settings row. Defaults served for a user without a
    /// row carry [`SettingsId::unsaved`].
    SettingsId
);

impl TenantId {
    /// A placeholder for rows built before the owning tenant is known.
    /// The tenant-scoped store replaces it with the caller's tenant on create.
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }
}

impl SettingsId {
    pub fn unsaved() -> Self {
        Self(Uuid::nil().to_string())
    }

    pub fn is_unsaved(&self) -> bool {
        self.0 == Uuid::nil().to_string()
    }
}
