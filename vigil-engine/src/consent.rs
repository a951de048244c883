//! Consent of third parties to act as emergency contacts.
//!
//! `pending -> approved | rejected` on an explicit response, `pending -> expired`
//! once the request lapses. Re-requesting always starts over at `pending`
//! with a fresh token. Only approved and verified contacts are ever notified.

use chrono::{Duration, Utc};
use uuid::Uuid;
use vigil_core::token::generate_token;
use vigil_core::types::EmergencyContact;
use vigil_core::{Result, VigilContext, VigilError};

pub struct ConsentService {
    ctx: VigilContext,
}

impl ConsentService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// Issue a fresh consent token for a contact owned by `user_id`.
    pub async fn request_consent(&self, user_id: Uuid, contact_id: Uuid) -> Result<EmergencyContact> {
        let now = Utc::now();
        let expires_at = now + Duration::days(self.ctx.config.scheduler.consent_ttl_days);
        let token = generate_token();

        let contact = self
            .ctx
            .store
            .set_consent_request(user_id, contact_id, &token, now, expires_at)
            .await?
            .ok_or(VigilError::ContactNotFound)?;

        tracing::info!("Consent requested for contact {} of user {}", contact_id, user_id);
        Ok(contact)
    }

    /// Unknown and expired tokens are indistinguishable to the caller.
    pub async fn resolve_by_token(&self, token: &str) -> Result<Option<EmergencyContact>> {
        self.ctx
            .store
            .find_contact_by_consent_token(token, Utc::now())
            .await
    }

    /// Record the contact's answer. The token is cleared, so a second call
    /// with it returns `None`.
    pub async fn process_consent(&self, token: &str, approved: bool) -> Result<Option<EmergencyContact>> {
        let contact = self
            .ctx
            .store
            .resolve_consent(token, approved, Utc::now())
            .await?;

        if let Some(contact) = &contact {
            tracing::info!(
                "Contact {} {} consent",
                contact.id,
                if approved { "approved" } else { "rejected" }
            );
        }
        Ok(contact)
    }

    /// The only list automated alerts may be sent to.
    pub async fn active_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        let contacts = self.ctx.store.active_contacts(user_id).await?;
        debug_assert!(contacts.iter().all(EmergencyContact::is_eligible));
        Ok(contacts)
    }

    pub async fn expire_stale_consents(&self) -> Result<u64> {
        let expired = self.ctx.store.expire_stale_consents(Utc::now(), None).await?;
        if expired > 0 {
            tracing::info!("Expired {} stale consent requests", expired);
        }
        Ok(expired)
    }

    /// Current consent state of one contact, expiring it first if its request lapsed.
    pub async fn status(&self, user_id: Uuid, contact_id: Uuid) -> Result<EmergencyContact> {
        self.ctx
            .store
            .expire_stale_consents(Utc::now(), Some(user_id))
            .await?;
        self.ctx
            .store
            .get_contact(user_id, contact_id)
            .await?
            .ok_or(VigilError::ContactNotFound)
    }
}
