use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::types::PersonalMessage;
use vigil_core::{decrypt_content, encrypt_content, Result, VigilContext, VigilError};

pub const MAX_CHARACTERS: usize = 2000;

/// Decrypted view returned to the owner.
#[derive(Debug, Clone, Serialize)]
pub struct PersonalMessageView {
    pub id: Uuid,
    pub content: String,
    pub is_enabled: bool,
    pub character_count: usize,
    pub max_characters: usize,
    pub updated_at: DateTime<Utc>,
}

/// A single message per user, delivered to contacts with a missed check-in
/// alert. Stored encrypted under a key scoped to the owner.
pub struct PersonalMessageService {
    ctx: VigilContext,
}

impl PersonalMessageService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    pub async fn save(&self, user_id: Uuid, content: &str, is_enabled: bool) -> Result<PersonalMessageView> {
        let length = content.chars().count();
        if length > MAX_CHARACTERS {
            return Err(VigilError::MessageTooLong {
                max: MAX_CHARACTERS,
                actual: length,
            });
        }
        if content.trim().is_empty() {
            return Err(VigilError::Validation("content must not be empty".to_string()));
        }
        if self.ctx.store.get_user(user_id).await?.is_none() {
            return Err(VigilError::UserNotFound);
        }

        let encrypted = encrypt_content(content, &user_id.to_string(), &self.ctx.content_key)?;
        let now = Utc::now();
        let stored = self
            .ctx
            .store
            .upsert_personal_message(PersonalMessage {
                id: Uuid::new_v4(),
                user_id,
                content: encrypted,
                is_enabled,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!("Saved personal message for user {}", user_id);
        Ok(view(&stored, content.to_string()))
    }

    pub async fn get(&self, user_id: Uuid) -> Result<PersonalMessageView> {
        let stored = self
            .ctx
            .store
            .get_personal_message(user_id)
            .await?
            .ok_or(VigilError::MessageNotFound)?;
        let content = self.decrypt(&stored)?;
        Ok(view(&stored, content))
    }

    pub async fn delete(&self, user_id: Uuid) -> Result<()> {
        if !self.ctx.store.delete_personal_message(user_id).await? {
            return Err(VigilError::MessageNotFound);
        }
        tracing::info!("Deleted personal message for user {}", user_id);
        Ok(())
    }

    /// Plaintext to attach to an alert, if the user has an enabled message.
    /// An undecryptable message is skipped rather than failing the alert.
    pub async fn for_notification(&self, user_id: Uuid) -> Result<Option<String>> {
        let stored = match self.ctx.store.get_personal_message(user_id).await? {
            Some(stored) if stored.is_enabled => stored,
            _ => return Ok(None),
        };

        match self.decrypt(&stored) {
            Ok(content) if !content.trim().is_empty() => Ok(Some(content)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::error!("Skipping personal message of user {}: {}", user_id, e);
                Ok(None)
            }
        }
    }

    fn decrypt(&self, stored: &PersonalMessage) -> Result<String> {
        decrypt_content(&stored.content, &stored.user_id.to_string(), &self.ctx.content_key).map_err(|e| {
            tracing::warn!("Failed to decrypt personal message {}: {}", stored.id, e);
            VigilError::Decryption
        })
    }
}

fn view(stored: &PersonalMessage, content: String) -> PersonalMessageView {
    PersonalMessageView {
        id: stored.id,
        character_count: content.chars().count(),
        content,
        is_enabled: stored.is_enabled,
        max_characters: MAX_CHARACTERS,
        updated_at: stored.updated_at,
    }
}
