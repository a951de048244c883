use uuid::Uuid;
use vigil_core::types::User;
use vigil_core::{Result, VigilContext, VigilError};

use crate::contacts::validate_email;

pub const MAX_NICKNAME_LEN: usize = 50;

/// Account lifecycle and push destination registration.
pub struct AccountService {
    ctx: VigilContext,
}

impl AccountService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    pub async fn register(&self, email: &str, nickname: Option<String>) -> Result<User> {
        let email = email.trim().to_lowercase();
        if !validate_email(&email) {
            return Err(VigilError::Validation("invalid email address".to_string()));
        }
        let nickname = nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if let Some(n) = &nickname {
            if n.chars().count() > MAX_NICKNAME_LEN {
                return Err(VigilError::Validation(format!(
                    "nickname must be at most {} characters",
                    MAX_NICKNAME_LEN
                )));
            }
        }

        let user = self.ctx.store.insert_user(User::new(email, nickname)).await?;
        tracing::info!("Registered user {}", user.id);
        Ok(user)
    }

    pub async fn get(&self, user_id: Uuid) -> Result<User> {
        self.ctx
            .store
            .get_user(user_id)
            .await?
            .ok_or(VigilError::UserNotFound)
    }

    /// Like [`get`](Self::get) but rejects deactivated accounts.
    pub async fn require_active(&self, user_id: Uuid) -> Result<User> {
        let user = self.get(user_id).await?;
        if !user.is_active {
            return Err(VigilError::InactiveUser);
        }
        Ok(user)
    }

    /// `None` clears the destination and stops push reminders.
    pub async fn set_push_token(&self, user_id: Uuid, fcm_token: Option<String>) -> Result<User> {
        let fcm_token = fcm_token.filter(|t| !t.trim().is_empty());
        self.ctx
            .store
            .set_push_token(user_id, fcm_token)
            .await?
            .ok_or(VigilError::UserNotFound)
    }

    pub async fn deactivate(&self, user_id: Uuid) -> Result<()> {
        if !self.ctx.store.deactivate_user(user_id).await? {
            return Err(VigilError::UserNotFound);
        }
        tracing::info!("Deactivated user {}", user_id);
        Ok(())
    }

    /// Hard delete of the user and everything they own.
    pub async fn purge(&self, user_id: Uuid) -> Result<()> {
        if !self.ctx.store.purge_user(user_id).await? {
            return Err(VigilError::UserNotFound);
        }
        tracing::info!("Purged user {}", user_id);
        Ok(())
    }
}
