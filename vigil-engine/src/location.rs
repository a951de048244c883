use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::types::LocationSharingLog;
use vigil_core::{Result, VigilContext, VigilError};

pub const LOCATION_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct LocationConsent {
    pub location_consent: bool,
    pub location_consent_at: Option<DateTime<Utc>>,
}

pub struct LocationService {
    ctx: VigilContext,
}

impl LocationService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// Granting stamps the consent time, revoking clears it.
    pub async fn set_consent(&self, user_id: Uuid, consent: bool) -> Result<LocationConsent> {
        let consent_at = consent.then(Utc::now);
        let user = self
            .ctx
            .store
            .set_location_consent(user_id, consent, consent_at)
            .await?
            .ok_or(VigilError::UserNotFound)?;

        tracing::info!("User {} set location consent to {}", user_id, consent);
        Ok(LocationConsent {
            location_consent: user.location_consent,
            location_consent_at: user.location_consent_at,
        })
    }

    pub async fn consent(&self, user_id: Uuid) -> Result<LocationConsent> {
        let user = self
            .ctx
            .store
            .get_user(user_id)
            .await?
            .ok_or(VigilError::UserNotFound)?;
        Ok(LocationConsent {
            location_consent: user.location_consent,
            location_consent_at: user.location_consent_at,
        })
    }

    /// Record that a location was shared with `recipient_ids`.
    pub async fn log_sharing(
        &self,
        user_id: Uuid,
        event_type: &str,
        location_lat: Option<f64>,
        location_lng: Option<f64>,
        recipient_ids: Vec<Uuid>,
    ) -> Result<LocationSharingLog> {
        self.ctx
            .store
            .insert_location_log(LocationSharingLog {
                id: Uuid::new_v4(),
                user_id,
                event_type: event_type.to_string(),
                location_lat,
                location_lng,
                recipient_ids,
                shared_at: Utc::now(),
            })
            .await
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<LocationSharingLog>> {
        self.ctx
            .store
            .list_location_logs(user_id, LOCATION_HISTORY_LIMIT)
            .await
    }
}
