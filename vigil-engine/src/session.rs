use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use vigil_core::token::generate_token;
use vigil_core::types::{CheckInMethod, CheckInSessionToken, User};
use vigil_core::{Result, VigilContext, VigilError};

use crate::checkin::{CheckInReceipt, CheckInService};

/// Used tokens are kept this long for audit before cleanup removes them.
pub const USED_TOKEN_RETENTION_HOURS: i64 = 24;

/// One-time quick check-in tokens. Possession of the token is the credential.
pub struct SessionTokenService {
    ctx: VigilContext,
}

impl SessionTokenService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// `ttl_hours` defaults to the configured session TTL.
    pub async fn issue(&self, user_id: Uuid, ttl_hours: Option<i64>) -> Result<CheckInSessionToken> {
        if self.ctx.store.get_user(user_id).await?.is_none() {
            return Err(VigilError::UserNotFound);
        }

        let ttl = ttl_hours.unwrap_or(self.ctx.config.scheduler.session_token_ttl_hours);
        let now = Utc::now();
        let token = CheckInSessionToken {
            id: Uuid::new_v4(),
            user_id,
            token: generate_token(),
            expires_at: now + Duration::hours(ttl),
            used_at: None,
            created_at: now,
        };

        self.ctx.store.insert_session_token(token).await
    }

    /// Single-use: exactly one caller presenting a valid token gets the user.
    /// Tokens of deactivated accounts are spent but yield nothing.
    pub async fn consume(&self, token: &str) -> Result<Option<User>> {
        let consumed = match self.ctx.store.consume_session_token(token, Utc::now()).await? {
            Some(consumed) => consumed,
            None => return Ok(None),
        };

        let user = self.ctx.store.get_user(consumed.user_id).await?;
        Ok(user.filter(|u| u.is_active))
    }

    /// `None` when the token is unknown, expired or already used.
    pub async fn quick_check_in(&self, token: &str) -> Result<Option<CheckInReceipt>> {
        let user = match self.consume(token).await? {
            Some(user) => user,
            None => {
                tracing::debug!("Rejected quick check-in token");
                return Ok(None);
            }
        };

        let receipt = CheckInService::new(self.ctx.clone())
            .record(user.id, CheckInMethod::PushResponse)
            .await?;
        Ok(Some(receipt))
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = self
            .ctx
            .store
            .delete_stale_session_tokens(now, now - Duration::hours(USED_TOKEN_RETENTION_HOURS))
            .await?;
        if deleted > 0 {
            tracing::info!("Deleted {} stale check-in session tokens", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use vigil_core::testing::TestHarness;
    use vigil_core::Store;

    #[tokio::test]
    async fn test_issue_requires_user() {
        let h = TestHarness::new();
        let service = SessionTokenService::new(h.ctx.clone());
        assert!(matches!(
            service.issue(Uuid::new_v4(), None).await,
            Err(VigilError::UserNotFound)
        ));

        let user = h.user(None);
        let token = service.issue(user.id, None).await.unwrap();
        assert!(token.token.len() >= 43);
        assert!(token.used_at.is_none());
        assert_eq!(token.expires_at - token.created_at, Duration::hours(1));
    }

    #[tokio::test]
    async fn test_token_single_use() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SessionTokenService::new(h.ctx.clone());
        let token = service.issue(user.id, None).await.unwrap();

        let first = service.consume(&token.token).await.unwrap();
        assert_eq!(first.map(|u| u.id), Some(user.id));
        assert!(service.consume(&token.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_one_winner() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SessionTokenService::new(h.ctx.clone());
        let token = service.issue(user.id, None).await.unwrap();

        let attempts = (0..8).map(|_| service.consume(&token.token));
        let results = join_all(attempts).await;
        let winners = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_token_never_consumable() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SessionTokenService::new(h.ctx.clone());
        let token = service.issue(user.id, Some(-1)).await.unwrap();

        assert!(service.consume(&token.token).await.unwrap().is_none());
        assert!(service.quick_check_in(&token.token).await.unwrap().is_none());
        assert_eq!(h.store.check_in_count(user.id), 0);
    }

    #[tokio::test]
    async fn test_quick_check_in_records_push_response() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SessionTokenService::new(h.ctx.clone());
        let token = service.issue(user.id, None).await.unwrap();

        let receipt = service.quick_check_in(&token.token).await.unwrap().unwrap();
        assert_eq!(receipt.log.method, CheckInMethod::PushResponse);
        assert_eq!(receipt.user.last_check_in, Some(receipt.log.checked_at));

        let stored = h.store.get_session_token(&token.token).await.unwrap().unwrap();
        assert!(stored.used_at.is_some());
        assert!(service.quick_check_in(&token.token).await.unwrap().is_none());
        assert_eq!(h.store.check_in_count(user.id), 1);
    }

    #[tokio::test]
    async fn test_deactivated_user_token_yields_nothing() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SessionTokenService::new(h.ctx.clone());
        let token = service.issue(user.id, None).await.unwrap();
        h.store.deactivate_user(user.id).await.unwrap();

        assert!(service.quick_check_in(&token.token).await.unwrap().is_none());
    }
}
