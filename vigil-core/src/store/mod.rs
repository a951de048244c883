//! Persistence boundary.
//!
//! Every operation that must be atomic is a single trait method so each
//! backend can honor it its own way: a transaction or conditional `UPDATE` in
//! Postgres, a single lock scope in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    CheckInLog, CheckInSessionToken, ContactType, EmergencyContact, LocationSharingLog,
    NotificationLog, PersonalMessage, ReminderSettings, SosEvent, SosStatus, User,
};

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod pg;

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
pub use pg::PgStore;

/// Fields of a contact the owner may change after creation.
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users

    /// Fails with `DuplicateEmail` when the address is taken.
    async fn insert_user(&self, user: User) -> Result<User>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn update_check_in_settings(
        &self,
        user_id: Uuid,
        check_in_cycle: Option<i32>,
        grace_period: Option<i32>,
    ) -> Result<Option<User>>;
    async fn set_push_token(&self, user_id: Uuid, fcm_token: Option<String>) -> Result<Option<User>>;
    async fn set_location_consent(
        &self,
        user_id: Uuid,
        consent: bool,
        consent_at: Option<DateTime<Utc>>,
    ) -> Result<Option<User>>;
    /// Soft delete: `is_active = false`, all rows retained.
    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool>;
    /// Hard delete with cascade over every owned row.
    async fn purge_user(&self, user_id: Uuid) -> Result<bool>;
    /// Active users with a baseline check-in.
    async fn active_users_with_check_in(&self) -> Result<Vec<User>>;
    /// Active users with a baseline check-in and a push destination.
    async fn reminder_candidates(&self) -> Result<Vec<User>>;

    // Check-ins

    /// Insert the log and set `last_check_in = log.checked_at` as one unit.
    /// Returns the updated user, or `None` if the user does not exist.
    async fn record_check_in(&self, log: CheckInLog) -> Result<Option<User>>;
    /// Newest first. Returns the page and the total row count.
    async fn check_in_history(
        &self,
        user_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<CheckInLog>, i64)>;

    // Quick check-in session tokens

    async fn insert_session_token(&self, token: CheckInSessionToken) -> Result<CheckInSessionToken>;
    async fn get_session_token(&self, token: &str) -> Result<Option<CheckInSessionToken>>;
    /// Mark the token used if it is unused and unexpired. Exactly one of any
    /// number of concurrent callers gets `Some`.
    async fn consume_session_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<CheckInSessionToken>>;
    /// Delete tokens expired before `now` and tokens used before `used_before`.
    async fn delete_stale_session_tokens(
        &self,
        now: DateTime<Utc>,
        used_before: DateTime<Utc>,
    ) -> Result<u64>;

    // Emergency contacts

    /// Ordered by priority, then creation time.
    async fn list_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>>;
    async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<Option<EmergencyContact>>;
    async fn count_contacts(&self, user_id: Uuid) -> Result<i64>;
    async fn contact_exists(
        &self,
        user_id: Uuid,
        contact_type: ContactType,
        contact_value: &str,
    ) -> Result<bool>;
    async fn insert_contact(&self, contact: EmergencyContact) -> Result<EmergencyContact>;
    async fn update_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: ContactUpdate,
    ) -> Result<Option<EmergencyContact>>;
    /// Delete and renumber the remaining priorities 1..n in one unit.
    async fn delete_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<bool>;
    /// Reset consent to `pending` with a fresh token, clearing the previous response.
    async fn set_consent_request(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        token: &str,
        requested_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>>;
    /// Contact holding `token` whose request has not expired at `now`.
    async fn find_contact_by_consent_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>>;
    /// Conditional single-use resolution: sets the response, clears the token
    /// and, on approval, marks the contact verified.
    async fn resolve_consent(
        &self,
        token: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>>;
    /// Approved and verified contacts ordered by priority.
    async fn active_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>>;
    /// `pending` contacts whose request lapsed before `now` become `expired`.
    /// Scoped to one user when `user_id` is given.
    async fn expire_stale_consents(&self, now: DateTime<Utc>, user_id: Option<Uuid>) -> Result<u64>;

    // SOS events

    async fn insert_sos_event(&self, event: SosEvent) -> Result<SosEvent>;
    async fn get_sos_event(&self, event_id: Uuid) -> Result<Option<SosEvent>>;
    /// Compare-and-swap out of `triggered`. Stamps `cancelled_at` or `sent_at`.
    /// `owner` restricts the transition to that user's event.
    async fn transition_sos(
        &self,
        event_id: Uuid,
        owner: Option<Uuid>,
        to: SosStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SosEvent>>;
    /// Most recent `triggered` event.
    async fn active_sos_event(&self, user_id: Uuid) -> Result<Option<SosEvent>>;
    async fn list_sos_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<SosEvent>>;
    /// Events still `triggered` that were triggered before `cutoff`.
    async fn stale_triggered_sos(&self, cutoff: DateTime<Utc>) -> Result<Vec<SosEvent>>;

    // Reminder settings

    /// Get-or-create: inserts `defaults` if the user has no row yet.
    async fn reminder_settings(&self, defaults: ReminderSettings) -> Result<ReminderSettings>;
    async fn save_reminder_settings(&self, settings: ReminderSettings) -> Result<ReminderSettings>;

    // Notification audit trail

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog>;
    async fn list_notification_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<NotificationLog>>;

    // Personal message

    async fn get_personal_message(&self, user_id: Uuid) -> Result<Option<PersonalMessage>>;
    /// Insert or replace content and `is_enabled` for the user's single message.
    async fn upsert_personal_message(&self, message: PersonalMessage) -> Result<PersonalMessage>;
    async fn delete_personal_message(&self, user_id: Uuid) -> Result<bool>;

    // Location sharing

    async fn insert_location_log(&self, log: LocationSharingLog) -> Result<LocationSharingLog>;
    async fn list_location_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<LocationSharingLog>>;
}
