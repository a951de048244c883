use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use vigil_core::types::ReminderSettings;
use vigil_core::{Result, VigilContext, VigilError};

pub const REMINDER_HOURS_RANGE: std::ops::RangeInclusive<i32> = 1..=168;
pub const MAX_THRESHOLDS: usize = 5;
pub const MAX_CUSTOM_MESSAGE_CHARS: usize = 100;
/// The reminder sweep polls every few hours, so thresholds match within this window.
pub const THRESHOLD_TOLERANCE_HOURS: i64 = 3;

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReminderSettingsUpdate {
    pub reminder_hours_before: Option<Vec<i32>>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub preferred_time: Option<NaiveTime>,
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub custom_message: Option<String>,
}

/// Quiet hours are inclusive at both ends. A window whose start is after its
/// end wraps past midnight. Unset bounds mean no quiet hours.
pub fn is_quiet_hours(settings: &ReminderSettings, at: NaiveTime) -> bool {
    match (settings.quiet_hours_start, settings.quiet_hours_end) {
        (Some(start), Some(end)) if start <= end => start <= at && at <= end,
        (Some(start), Some(end)) => at >= start || at <= end,
        _ => false,
    }
}

/// True when push is enabled, `at` is outside quiet hours and the remaining
/// time is within tolerance of any configured threshold.
pub fn should_remind(settings: &ReminderSettings, hours_until_deadline: i64, at: NaiveTime) -> bool {
    if !settings.push_enabled || is_quiet_hours(settings, at) {
        return false;
    }
    settings
        .reminder_hours_before
        .iter()
        .any(|&threshold| (hours_until_deadline - threshold as i64).abs() <= THRESHOLD_TOLERANCE_HOURS)
}

pub struct ReminderService {
    ctx: VigilContext,
}

impl ReminderService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// Get-or-create with defaults (`[48, 24, 12]`, push on, e-mail off).
    pub async fn settings_for(&self, user_id: Uuid) -> Result<ReminderSettings> {
        if self.ctx.store.get_user(user_id).await?.is_none() {
            return Err(VigilError::UserNotFound);
        }
        self.ctx
            .store
            .reminder_settings(ReminderSettings::defaults_for(user_id))
            .await
    }

    pub async fn update(&self, user_id: Uuid, update: ReminderSettingsUpdate) -> Result<ReminderSettings> {
        let mut settings = self.settings_for(user_id).await?;

        if let Some(hours) = update.reminder_hours_before {
            if hours.is_empty() || hours.len() > MAX_THRESHOLDS {
                return Err(VigilError::Validation(format!(
                    "reminder_hours_before must have 1 to {} entries",
                    MAX_THRESHOLDS
                )));
            }
            let mut kept: Vec<i32> = hours
                .into_iter()
                .filter(|h| REMINDER_HOURS_RANGE.contains(h))
                .collect();
            // Nothing in range leaves the stored thresholds untouched
            if !kept.is_empty() {
                kept.sort_unstable_by(|a, b| b.cmp(a));
                settings.reminder_hours_before = kept;
            }
        }
        if let Some(start) = update.quiet_hours_start {
            settings.quiet_hours_start = Some(start);
        }
        if let Some(end) = update.quiet_hours_end {
            settings.quiet_hours_end = Some(end);
        }
        if let Some(preferred) = update.preferred_time {
            settings.preferred_time = Some(preferred);
        }
        if let Some(push) = update.push_enabled {
            settings.push_enabled = push;
        }
        if let Some(email) = update.email_enabled {
            settings.email_enabled = email;
        }
        if let Some(message) = update.custom_message {
            let message: String = message.trim().chars().take(MAX_CUSTOM_MESSAGE_CHARS).collect();
            settings.custom_message = Some(message).filter(|m| !m.is_empty());
        }

        self.ctx.store.save_reminder_settings(settings).await
    }

    pub async fn clear_quiet_hours(&self, user_id: Uuid) -> Result<ReminderSettings> {
        let mut settings = self.settings_for(user_id).await?;
        settings.quiet_hours_start = None;
        settings.quiet_hours_end = None;
        self.ctx.store.save_reminder_settings(settings).await
    }

    /// Evaluated against the current UTC time of day.
    pub async fn should_remind(&self, user_id: Uuid, hours_until_deadline: i64) -> Result<(bool, Option<String>)> {
        let settings = self.settings_for(user_id).await?;
        if should_remind(&settings, hours_until_deadline, Utc::now().time()) {
            Ok((true, settings.custom_message))
        } else {
            Ok((false, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::testing::TestHarness;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn settings() -> ReminderSettings {
        ReminderSettings::defaults_for(Uuid::new_v4())
    }

    #[test]
    fn test_quiet_hours_overnight() {
        let mut s = settings();
        s.quiet_hours_start = Some(t(22, 0));
        s.quiet_hours_end = Some(t(8, 0));

        assert!(is_quiet_hours(&s, t(23, 0)));
        assert!(is_quiet_hours(&s, t(7, 0)));
        assert!(is_quiet_hours(&s, t(22, 0)));
        assert!(!is_quiet_hours(&s, t(12, 0)));
        assert!(!is_quiet_hours(&s, t(21, 59)));
        assert!(!is_quiet_hours(&s, t(8, 1)));
    }

    #[test]
    fn test_quiet_hours_same_day_and_unset() {
        let mut s = settings();
        assert!(!is_quiet_hours(&s, t(3, 0)));

        s.quiet_hours_start = Some(t(13, 0));
        assert!(!is_quiet_hours(&s, t(14, 0)));

        s.quiet_hours_end = Some(t(15, 0));
        assert!(is_quiet_hours(&s, t(13, 0)));
        assert!(is_quiet_hours(&s, t(15, 0)));
        assert!(!is_quiet_hours(&s, t(15, 1)));
        assert!(!is_quiet_hours(&s, t(12, 59)));
    }

    #[test]
    fn test_threshold_tolerance() {
        let mut s = settings();
        assert!(should_remind(&s, 25, t(12, 0)));
        assert!(should_remind(&s, 21, t(12, 0)));
        assert!(should_remind(&s, 51, t(12, 0)));
        assert!(!should_remind(&s, 30, t(12, 0)));
        assert!(!should_remind(&s, 100, t(12, 0)));

        s.push_enabled = false;
        assert!(!should_remind(&s, 24, t(12, 0)));

        s.push_enabled = true;
        s.quiet_hours_start = Some(t(11, 0));
        s.quiet_hours_end = Some(t(13, 0));
        assert!(!should_remind(&s, 24, t(12, 0)));
    }

    #[tokio::test]
    async fn test_settings_created_lazily() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = ReminderService::new(h.ctx.clone());

        let first = service.settings_for(user.id).await.unwrap();
        assert_eq!(first.reminder_hours_before, vec![48, 24, 12]);
        assert!(first.push_enabled);
        assert!(!first.email_enabled);

        let again = service.settings_for(user.id).await.unwrap();
        assert_eq!(again.id, first.id);

        assert!(matches!(
            service.settings_for(Uuid::new_v4()).await,
            Err(VigilError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_partial_update() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = ReminderService::new(h.ctx.clone());

        let updated = service
            .update(
                user.id,
                ReminderSettingsUpdate {
                    reminder_hours_before: Some(vec![6, 200, 72, 0]),
                    custom_message: Some("x".repeat(150)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.reminder_hours_before, vec![72, 6]);
        assert_eq!(updated.custom_message.as_ref().map(|m| m.chars().count()), Some(100));
        assert!(updated.push_enabled);

        let unchanged = service
            .update(
                user.id,
                ReminderSettingsUpdate {
                    reminder_hours_before: Some(vec![500]),
                    quiet_hours_start: Some(t(22, 0)),
                    quiet_hours_end: Some(t(8, 0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unchanged.reminder_hours_before, vec![72, 6]);
        assert_eq!(unchanged.quiet_hours_start, Some(t(22, 0)));

        assert!(matches!(
            service
                .update(
                    user.id,
                    ReminderSettingsUpdate {
                        reminder_hours_before: Some(vec![]),
                        ..Default::default()
                    }
                )
                .await,
            Err(VigilError::Validation(_))
        ));

        let cleared = service.clear_quiet_hours(user.id).await.unwrap();
        assert!(cleared.quiet_hours_start.is_none());
        assert!(cleared.quiet_hours_end.is_none());
        assert_eq!(cleared.reminder_hours_before, vec![72, 6]);
    }

    #[tokio::test]
    async fn test_should_remind_returns_custom_message() {
        let h = TestHarness::new();
        let user = h.user(None);
        let service = ReminderService::new(h.ctx.clone());
        service
            .update(
                user.id,
                ReminderSettingsUpdate {
                    custom_message: Some("Tap to check in".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (remind, message) = service.should_remind(user.id, 24).await.unwrap();
        assert!(remind);
        assert_eq!(message.as_deref(), Some("Tap to check in"));

        let (remind, message) = service.should_remind(user.id, 30).await.unwrap();
        assert!(!remind);
        assert!(message.is_none());
    }
}
