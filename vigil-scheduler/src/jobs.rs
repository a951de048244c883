//! One pass of each periodic job. Every function takes `now` explicitly and
//! returns a summary; scheduling and retry live in [`crate::scheduler`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::clock;
use vigil_core::types::SosStatus;
use vigil_core::{Result, VigilContext, VigilError};
use vigil_engine::reminder::{is_quiet_hours, should_remind};
use vigil_engine::{ReminderService, SessionTokenService, SosService};
use vigil_notify::NotificationService;

/// Grace added to the SOS countdown before a still-`triggered` event counts
/// as abandoned by its dispatcher.
pub const SOS_RECOVERY_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissedCheckInSummary {
    pub processed_users: usize,
    pub alerts_sent: usize,
    pub messages_sent: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub normal_reminders_sent: usize,
    pub urgent_reminders_sent: usize,
    pub skipped_quiet_hours: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub tokens_deleted: u64,
    pub consents_expired: u64,
    pub sos_recovered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SosDispatchSummary {
    pub sos_event_id: Uuid,
    pub status: SosStatus,
    pub alerts_sent: usize,
}

/// Alert the contacts of every active user past `last_check_in + cycle + grace`.
///
/// There is no memory across runs: a user who stays overdue is alerted again
/// on every pass.
pub async fn sweep_missed_check_ins(ctx: &VigilContext, now: DateTime<Utc>) -> Result<MissedCheckInSummary> {
    tracing::info!("Starting missed check-in sweep");
    let notifier = NotificationService::new(ctx.clone());
    let mut summary = MissedCheckInSummary::default();

    for user in ctx.store.active_users_with_check_in().await? {
        let Some(last_check_in) = user.last_check_in else {
            continue;
        };
        if !clock::is_overdue(Some(last_check_in), user.check_in_cycle, user.grace_period, now) {
            continue;
        }

        tracing::info!("User {} has missed their check-in deadline", user.id);
        summary.processed_users += 1;

        let alerts = notifier
            .alert_missed_check_in(&user, clock::days_since(last_check_in, now))
            .await?;
        summary.alerts_sent += alerts.alerts_sent;
        summary.messages_sent += alerts.messages_sent;
    }

    tracing::info!("Missed check-in sweep completed: {:?}", summary);
    Ok(summary)
}

/// Push reminders ahead of the cycle deadline and urgent ones during the grace period.
pub async fn sweep_reminders(ctx: &VigilContext, now: DateTime<Utc>) -> Result<ReminderSummary> {
    tracing::info!("Starting reminder sweep");
    let reminders = ReminderService::new(ctx.clone());
    let tokens = SessionTokenService::new(ctx.clone());
    let notifier = NotificationService::new(ctx.clone());
    let mut summary = ReminderSummary::default();
    let time_of_day = now.time();

    for user in ctx.store.reminder_candidates().await? {
        let settings = reminders.settings_for(user.id).await?;
        if !settings.push_enabled {
            continue;
        }
        if is_quiet_hours(&settings, time_of_day) {
            summary.skipped_quiet_hours += 1;
            continue;
        }

        let (Some(cycle_deadline), Some(full_deadline)) = (
            clock::next_deadline(user.last_check_in, user.check_in_cycle),
            clock::full_deadline(user.last_check_in, user.check_in_cycle, user.grace_period),
        ) else {
            continue;
        };

        if now > cycle_deadline && now < full_deadline {
            let token = tokens.issue(user.id, None).await?;
            if notifier
                .send_urgent_reminder(&user, &token.token, settings.custom_message.as_deref())
                .await
            {
                summary.urgent_reminders_sent += 1;
                tracing::info!("Sent urgent reminder to user {}", user.id);
            }
        } else if now < cycle_deadline {
            let hours_until = clock::hours_until(cycle_deadline, now);
            if !should_remind(&settings, hours_until, time_of_day) {
                continue;
            }
            let token = tokens.issue(user.id, None).await?;
            if notifier
                .send_reminder(&user, hours_until / 24, &token.token, settings.custom_message.as_deref())
                .await
            {
                summary.normal_reminders_sent += 1;
                tracing::info!("Sent reminder to user {}: {} hours remaining", user.id, hours_until);
            }
        }
    }

    tracing::info!("Reminder sweep completed: {:?}", summary);
    Ok(summary)
}

/// Delete spent session tokens, expire lapsed consent requests and dispatch
/// SOS events whose dispatcher never ran.
pub async fn cleanup(ctx: &VigilContext, now: DateTime<Utc>) -> Result<CleanupSummary> {
    let tokens_deleted = SessionTokenService::new(ctx.clone())
        .cleanup_expired_at(now)
        .await?;
    let consents_expired = ctx.store.expire_stale_consents(now, None).await?;
    let sos_recovered = recover_stale_sos(ctx, now).await?;

    let summary = CleanupSummary {
        tokens_deleted,
        consents_expired,
        sos_recovered,
    };
    tracing::info!("Cleanup completed: {:?}", summary);
    Ok(summary)
}

/// Fire the SOS fan-out once the countdown is over.
///
/// The event is claimed (`triggered -> sent`) before any alert goes out, so a
/// cancel that lost the race cannot land after contacts were notified.
/// Recipients are read before the claim; once claimed, the fan-out itself
/// cannot fail.
pub async fn dispatch_sos(ctx: &VigilContext, sos_event_id: Uuid) -> Result<SosDispatchSummary> {
    let sos = SosService::new(ctx.clone());
    let notifier = NotificationService::new(ctx.clone());

    let pending = sos.get(sos_event_id).await?.ok_or(VigilError::SosNotFound)?;
    let recipients = match ctx.store.get_user(pending.user_id).await? {
        Some(user) => {
            let contacts = notifier.reachable_contacts(user.id).await?;
            Some((user, contacts))
        }
        None => None,
    };

    let Some(event) = sos.mark_sent(sos_event_id).await? else {
        let event = sos.get(sos_event_id).await?.ok_or(VigilError::SosNotFound)?;
        tracing::info!("SOS {} is already {}, skipping alerts", sos_event_id, event.status);
        return Ok(SosDispatchSummary {
            sos_event_id,
            status: event.status,
            alerts_sent: 0,
        });
    };

    let alerts_sent = match recipients {
        Some((user, contacts)) => notifier.alert_sos(&user, &event, &contacts).await,
        None => {
            tracing::warn!("User for SOS {} not found", sos_event_id);
            0
        }
    };

    Ok(SosDispatchSummary {
        sos_event_id,
        status: SosStatus::Sent,
        alerts_sent,
    })
}

/// Dispatch events still `triggered` well past their countdown.
pub async fn recover_stale_sos(ctx: &VigilContext, now: DateTime<Utc>) -> Result<usize> {
    let countdown = ctx.config.scheduler.sos_countdown_secs as i64;
    let cutoff = now - Duration::seconds(countdown + SOS_RECOVERY_GRACE_SECS);

    let stale = ctx.store.stale_triggered_sos(cutoff).await?;
    let mut recovered = 0;
    for event in stale {
        tracing::warn!("Recovering SOS {} left in triggered state", event.id);
        let outcome = dispatch_sos(ctx, event.id).await?;
        if outcome.status == SosStatus::Sent {
            recovered += 1;
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use vigil_core::testing::TestHarness;
    use vigil_core::types::{DeliveryStatus, NotificationType, SosEvent};
    use vigil_core::{Config, Store};
    use vigil_engine::ReminderSettingsUpdate;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn harness() -> TestHarness {
        let mut config = Config::default();
        config.scheduler.sos_countdown_secs = 0;
        TestHarness::with_config(config)
    }

    #[tokio::test]
    async fn test_missed_sweep_alerts_overdue_user_once() {
        let h = harness();
        let now = noon();
        let overdue = h.user(Some(now - Duration::days(10)));
        h.approved_contact(overdue.id, "a@example.com");

        let on_time = h.user(Some(now - Duration::days(3)));
        h.approved_contact(on_time.id, "b@example.com");

        let inactive = h.user(Some(now - Duration::days(30)));
        h.approved_contact(inactive.id, "c@example.com");
        h.store.deactivate_user(inactive.id).await.unwrap();

        let summary = sweep_missed_check_ins(&h.ctx, now).await.unwrap();
        assert_eq!(
            summary,
            MissedCheckInSummary {
                processed_users: 1,
                alerts_sent: 1,
                messages_sent: 0
            }
        );

        let logs = h.store.list_notification_logs(overdue.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].notification_type, NotificationType::StatusAlert);
        assert!(matches!(logs[0].status, DeliveryStatus::Sent | DeliveryStatus::Failed));
        assert!(h.delivery.emails()[0].text.contains("10 days"));
    }

    #[tokio::test]
    async fn test_missed_sweep_respects_grace_period() {
        let h = harness();
        let now = noon();
        // 7 days plus 47 hours: still inside the grace period
        let user = h.user(Some(now - Duration::days(7) - Duration::hours(47)));
        h.approved_contact(user.id, "a@example.com");

        let summary = sweep_missed_check_ins(&h.ctx, now).await.unwrap();
        assert_eq!(summary.processed_users, 0);
        assert!(h.delivery.emails().is_empty());
    }

    #[tokio::test]
    async fn test_reminder_sweep_branches() {
        let h = harness();
        let now = noon();

        // 24 hours before the cycle deadline
        let due_soon = h.user(Some(now - Duration::days(6)));
        h.store.set_push_token(due_soon.id, Some("device-soon".to_string())).await.unwrap();

        // In the grace period
        let in_grace = h.user(Some(now - Duration::days(8)));
        h.store.set_push_token(in_grace.id, Some("device-grace".to_string())).await.unwrap();

        // 4 days out, no threshold within tolerance
        let far = h.user(Some(now - Duration::days(3)));
        h.store.set_push_token(far.id, Some("device-far".to_string())).await.unwrap();

        // Would be reminded, but it is quiet time
        let sleeping = h.user(Some(now - Duration::days(6)));
        h.store.set_push_token(sleeping.id, Some("device-quiet".to_string())).await.unwrap();
        ReminderService::new(h.ctx.clone())
            .update(
                sleeping.id,
                ReminderSettingsUpdate {
                    quiet_hours_start: NaiveTime::from_hms_opt(11, 0, 0),
                    quiet_hours_end: NaiveTime::from_hms_opt(13, 0, 0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // No push destination, never considered
        h.user(Some(now - Duration::days(6)));

        let summary = sweep_reminders(&h.ctx, now).await.unwrap();
        assert_eq!(
            summary,
            ReminderSummary {
                normal_reminders_sent: 1,
                urgent_reminders_sent: 1,
                skipped_quiet_hours: 1
            }
        );

        let pushes = h.delivery.pushes();
        let normal = pushes.iter().find(|p| p.token == "device-soon").unwrap();
        assert_eq!(normal.data["type"], "checkin_reminder");
        assert_eq!(normal.data["days_remaining"], "1");
        let urgent = pushes.iter().find(|p| p.token == "device-grace").unwrap();
        assert_eq!(urgent.data["type"], "urgent_reminder");

        // The embedded token is a working quick check-in credential
        let receipt = SessionTokenService::new(h.ctx.clone())
            .quick_check_in(&urgent.data["token"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.user.id, in_grace.id);
        assert_eq!(h.store.session_token_count(), 2);
    }

    #[tokio::test]
    async fn test_sos_cancelled_before_dispatch_sends_nothing() {
        let h = harness();
        let user = h.user(None);
        h.approved_contact(user.id, "a@example.com");
        let sos = SosService::new(h.ctx.clone());

        let event = sos.trigger(user.id, None, None).await.unwrap();
        sos.cancel(user.id, event.id).await.unwrap().unwrap();

        let outcome = dispatch_sos(&h.ctx, event.id).await.unwrap();
        assert_eq!(outcome.status, SosStatus::Cancelled);
        assert_eq!(outcome.alerts_sent, 0);
        assert!(h.delivery.emails().is_empty());
        assert!(h.store.list_notification_logs(user.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sos_dispatch_claims_then_alerts() {
        let h = harness();
        let user = h.user(None);
        h.approved_contact(user.id, "a@example.com");
        let sos = SosService::new(h.ctx.clone());
        let event = sos.trigger(user.id, Some(10.0), Some(20.0)).await.unwrap();

        let outcome = dispatch_sos(&h.ctx, event.id).await.unwrap();
        assert_eq!(outcome.status, SosStatus::Sent);
        assert_eq!(outcome.alerts_sent, 1);
        assert!(sos.cancel(user.id, event.id).await.unwrap().is_none());

        let again = dispatch_sos(&h.ctx, event.id).await.unwrap();
        assert_eq!(again.alerts_sent, 0);
        assert_eq!(h.delivery.emails().len(), 1);

        assert!(matches!(
            dispatch_sos(&h.ctx, Uuid::new_v4()).await,
            Err(VigilError::SosNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sos_retry_after_log_failure_reaches_every_contact() {
        let h = harness();
        let user = h.user(None);
        h.approved_contact(user.id, "first@example.com");
        h.approved_contact(user.id, "second@example.com");
        let event = SosService::new(h.ctx.clone())
            .trigger(user.id, None, None)
            .await
            .unwrap();
        h.store.fail_notification_log_writes(1);

        let outcome = crate::scheduler::run_with_retry("sos_dispatch", 3, std::time::Duration::ZERO, || {
            dispatch_sos(&h.ctx, event.id)
        })
        .await
        .unwrap();
        assert_eq!(outcome.status, SosStatus::Sent);
        assert_eq!(outcome.alerts_sent, 2);

        let recipients: Vec<String> = h.delivery.emails().into_iter().map(|m| m.to).collect();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains(&"first@example.com".to_string()));
        assert!(recipients.contains(&"second@example.com".to_string()));

        let stored = h.store.get_sos_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SosStatus::Sent);
    }

    #[tokio::test]
    async fn test_cleanup_recovers_stale_sos_and_expires_data() {
        let h = harness();
        let now = Utc::now();
        let user = h.user(None);
        h.approved_contact(user.id, "a@example.com");

        let stale = h
            .store
            .insert_sos_event(SosEvent {
                id: Uuid::new_v4(),
                user_id: user.id,
                status: SosStatus::Triggered,
                triggered_at: now - Duration::minutes(5),
                cancelled_at: None,
                sent_at: None,
                location_lat: None,
                location_lng: None,
            })
            .await
            .unwrap();
        let fresh = SosService::new(h.ctx.clone())
            .trigger(user.id, None, None)
            .await
            .unwrap();

        SessionTokenService::new(h.ctx.clone())
            .issue(user.id, Some(-2))
            .await
            .unwrap();

        let summary = cleanup(&h.ctx, now).await.unwrap();
        assert_eq!(summary.tokens_deleted, 1);
        assert_eq!(summary.sos_recovered, 1);

        let stale_after = h.store.get_sos_event(stale.id).await.unwrap().unwrap();
        assert_eq!(stale_after.status, SosStatus::Sent);
        let fresh_after = h.store.get_sos_event(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh_after.status, SosStatus::Triggered);
    }
}
