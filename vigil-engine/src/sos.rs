//! SOS countdown state machine.
//!
//! `triggered` is the only non-terminal state. It moves to `cancelled` by the
//! user or to `sent` by the delayed dispatch, through a compare-and-swap on
//! the status column, so exactly one of the two ever wins.

use chrono::Utc;
use uuid::Uuid;
use vigil_core::types::{SosEvent, SosStatus};
use vigil_core::{Result, VigilContext, VigilError};

pub const SOS_HISTORY_LIMIT: i64 = 10;

pub struct SosService {
    ctx: VigilContext,
}

impl SosService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// Scheduling the delayed dispatch is the caller's job.
    pub async fn trigger(
        &self,
        user_id: Uuid,
        location_lat: Option<f64>,
        location_lng: Option<f64>,
    ) -> Result<SosEvent> {
        if self.ctx.store.get_user(user_id).await?.is_none() {
            return Err(VigilError::UserNotFound);
        }
        for (name, value, bound) in [("location_lat", location_lat, 90.0), ("location_lng", location_lng, 180.0)] {
            if let Some(v) = value {
                if !v.is_finite() || v.abs() > bound {
                    return Err(VigilError::Validation(format!("{} is out of range", name)));
                }
            }
        }

        let event = SosEvent {
            id: Uuid::new_v4(),
            user_id,
            status: SosStatus::Triggered,
            triggered_at: Utc::now(),
            cancelled_at: None,
            sent_at: None,
            location_lat,
            location_lng,
        };

        let event = self.ctx.store.insert_sos_event(event).await?;
        tracing::warn!("SOS {} triggered by user {}", event.id, user_id);
        Ok(event)
    }

    /// `None` unless the event belongs to `user_id` and is still `triggered`.
    pub async fn cancel(&self, user_id: Uuid, sos_id: Uuid) -> Result<Option<SosEvent>> {
        let cancelled = self
            .ctx
            .store
            .transition_sos(sos_id, Some(user_id), SosStatus::Cancelled, Utc::now())
            .await?;
        if cancelled.is_some() {
            tracing::info!("SOS {} cancelled by user {}", sos_id, user_id);
        }
        Ok(cancelled)
    }

    pub async fn active_event(&self, user_id: Uuid) -> Result<Option<SosEvent>> {
        self.ctx.store.active_sos_event(user_id).await
    }

    pub async fn get(&self, sos_id: Uuid) -> Result<Option<SosEvent>> {
        self.ctx.store.get_sos_event(sos_id).await
    }

    pub async fn is_still_active(&self, sos_id: Uuid) -> Result<bool> {
        Ok(self
            .ctx
            .store
            .get_sos_event(sos_id)
            .await?
            .map(|e| e.status == SosStatus::Triggered)
            .unwrap_or(false))
    }

    /// `triggered -> sent`. `None` if the event already left `triggered`.
    pub async fn mark_sent(&self, sos_id: Uuid) -> Result<Option<SosEvent>> {
        self.ctx
            .store
            .transition_sos(sos_id, None, SosStatus::Sent, Utc::now())
            .await
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<SosEvent>> {
        self.ctx.store.list_sos_events(user_id, SOS_HISTORY_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join;
    use vigil_core::testing::TestHarness;

    #[tokio::test]
    async fn test_trigger_and_cancel() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SosService::new(h.ctx.clone());

        let event = service.trigger(user.id, Some(37.5), Some(127.0)).await.unwrap();
        assert_eq!(event.status, SosStatus::Triggered);
        assert_eq!(service.active_event(user.id).await.unwrap().map(|e| e.id), Some(event.id));

        let cancelled = service.cancel(user.id, event.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, SosStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert!(!service.is_still_active(event.id).await.unwrap());
        assert!(service.active_event(user.id).await.unwrap().is_none());

        assert!(service.cancel(user.id, event.id).await.unwrap().is_none());
        assert!(service.mark_sent(event.id).await.unwrap().is_none());
        assert_eq!(
            service.get(event.id).await.unwrap().unwrap().status,
            SosStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cannot_cancel_after_sent_or_foreign() {
        let h = TestHarness::new();
        let user = h.user(None);
        let stranger = h.user(None);
        let service = SosService::new(h.ctx.clone());

        let event = service.trigger(user.id, None, None).await.unwrap();
        assert!(service.cancel(stranger.id, event.id).await.unwrap().is_none());
        assert!(service.is_still_active(event.id).await.unwrap());

        let sent = service.mark_sent(event.id).await.unwrap().unwrap();
        assert_eq!(sent.status, SosStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert!(service.cancel(user.id, event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_and_dispatch_race_has_one_winner() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SosService::new(h.ctx.clone());

        for _ in 0..20 {
            let event = service.trigger(user.id, None, None).await.unwrap();
            let (cancelled, sent) = join(service.cancel(user.id, event.id), service.mark_sent(event.id)).await;
            let cancelled = cancelled.unwrap();
            let sent = sent.unwrap();
            assert!(cancelled.is_some() ^ sent.is_some());

            let final_status = service.get(event.id).await.unwrap().unwrap().status;
            let expected = if cancelled.is_some() { SosStatus::Cancelled } else { SosStatus::Sent };
            assert_eq!(final_status, expected);
        }
    }

    #[tokio::test]
    async fn test_trigger_validation() {
        let h = TestHarness::new();
        let service = SosService::new(h.ctx.clone());
        assert!(matches!(
            service.trigger(Uuid::new_v4(), None, None).await,
            Err(VigilError::UserNotFound)
        ));

        let user = h.user(None);
        assert!(matches!(
            service.trigger(user.id, Some(91.0), Some(0.0)).await,
            Err(VigilError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_capped() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = SosService::new(h.ctx.clone());
        for _ in 0..12 {
            service.trigger(user.id, None, None).await.unwrap();
        }
        let history = service.history(user.id).await.unwrap();
        assert_eq!(history.len(), 10);
        assert!(history.windows(2).all(|w| w[0].triggered_at >= w[1].triggered_at));
    }
}
