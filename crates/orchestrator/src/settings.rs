//! Per-user UI preferences.
//!
//! Reads never create a row: a user who never saved settings is served the
//! defaults. The first update inserts the row, later ones change only the
//! fields they name.

use chrono::Utc;
use domgate_core::error::{Result, StoreError};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::SettingsId;
use domgate_core::model::{FontSize, Language, Theme, UserSettings};
use domgate_store::{Database, Store};
use serde::Deserialize;
use tracing::{debug, info};

/// A partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub theme: Option<Theme>,
    pub language: Option<Language>,
    pub font_size: Option<FontSize>,
    pub llm_profile: Option<String>,
    pub has_seen_onboarding: Option<bool>,
    pub onboarding_skipped: Option<bool>,
}

impl SettingsUpdate {
    fn apply(self, settings: &mut UserSettings) {
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        if let Some(language) = self.language {
            settings.language = language;
        }
        if let Some(font_size) = self.font_size {
            settings.font_size = font_size;
        }
        if let Some(profile) = self.llm_profile {
            settings.llm_profile = Some(profile);
        }
        if let Some(seen) = self.has_seen_onboarding {
            settings.has_seen_onboarding = seen;
        }
        if let Some(skipped) = self.onboarding_skipped {
            settings.onboarding_skipped = skipped;
        }
    }
}

pub struct SettingsService {
    db: Database,
}

impl SettingsService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, identity: &AuthenticatedUser) -> Result<UserSettings> {
        Ok(self.stored(identity).await?.unwrap_or_else(|| {
            UserSettings::defaults_for(identity.tenant_id.clone(), identity.user_id.clone())
        }))
    }

    pub async fn update(&self, identity: &AuthenticatedUser, update: SettingsUpdate) -> Result<UserSettings> {
        if let Some(mut settings) = self.stored(identity).await? {
            update.apply(&mut settings);
            settings.updated_at = Utc::now();
            self.store(identity).update(&settings).await?;
            debug!(user = %identity.user_id, "Settings updated");
            return Ok(settings);
        }

        let mut settings = UserSettings::defaults_for(identity.tenant_id.clone(), identity.user_id.clone());
        settings.id = SettingsId::new();
        update.clone().apply(&mut settings);
        match self.store(identity).create(settings).await {
            Ok(settings) => {
                info!(user = %identity.user_id, "Settings row created");
                Ok(settings)
            }
            // A concurrent first update won the insert; apply ours on top.
            Err(StoreError::Constraint(_)) => {
                let mut settings = self.stored(identity).await?.ok_or_else(|| StoreError::NotFound {
                    entity: "UserSettings",
                    id: identity.user_id.to_string(),
                })?;
                update.apply(&mut settings);
                settings.updated_at = Utc::now();
                self.store(identity).update(&settings).await?;
                Ok(settings)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stored(&self, identity: &AuthenticatedUser) -> Result<Option<UserSettings>> {
        Ok(self.store(identity).for_user(&identity.user_id).await?)
    }

    fn store(&self, identity: &AuthenticatedUser) -> Store<UserSettings> {
        self.db.scoped(&identity.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domgate_core::model::{Tenant, User};
    use domgate_store::Filter;

    async fn setup() -> (SettingsService, Database, AuthenticatedUser) {
        let db = Database::in_memory().await.unwrap();
        let tenant = db.system::<Tenant>().create(Tenant::new("acme")).await.unwrap();
        let mut user = User::new("ana@acme.test", "x", false);
        user.tenant_id = tenant.id.clone();
        let user = db.system::<User>().create(user).await.unwrap();
        (SettingsService::new(db.clone()), db, AuthenticatedUser::from(&user))
    }

    #[tokio::test]
    async fn defaults_are_served_without_a_row() {
        let (service, db, ana) = setup().await;
        let settings = service.get(&ana).await.unwrap();
        assert!(settings.id.is_unsaved());
        assert_eq!(settings.theme, Theme::Light);
        assert_eq!(settings.language, Language::Ja);
        assert_eq!(settings.font_size, FontSize::Medium);
        assert!(!settings.has_seen_onboarding);

        let rows = db.scoped::<UserSettings>(&ana.tenant_id).count(Filter::new()).await.unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn partial_updates_keep_other_fields() {
        let (service, db, ana) = setup().await;

        let first = service
            .update(
                &ana,
                SettingsUpdate {
                    theme: Some(Theme::Dark),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!first.id.is_unsaved());
        assert_eq!(first.theme, Theme::Dark);

        let second = service
            .update(
                &ana,
                SettingsUpdate {
                    language: Some(Language::En),
                    has_seen_onboarding: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.theme, Theme::Dark);
        assert_eq!(second.language, Language::En);
        assert!(second.has_seen_onboarding);

        let stored = service.get(&ana).await.unwrap();
        assert_eq!(stored.id, second.id);
        assert_eq!(stored.theme, Theme::Dark);
        assert_eq!(stored.language, Language::En);
        assert!(stored.has_seen_onboarding);
        let rows = db.scoped::<UserSettings>(&ana.tenant_id).count(Filter::new()).await.unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn unknown_values_do_not_deserialize() {
        assert!(serde_json::from_str::<SettingsUpdate>(r#"{"theme": "sepia"}"#).is_err());
        assert!(serde_json::from_str::<SettingsUpdate>(r#"{"colour": "dark"}"#).is_err());
        let update: SettingsUpdate = serde_json::from_str(r#"{"font_size": "large"}"#).unwrap();
        assert_eq!(update.font_size, Some(FontSize::Large));
    }
}
