use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use std::sync::Arc;
use uuid::Uuid;

use super::{ContactUpdate, Store};
use crate::db::{DbConnection, DbPool};
use crate::error::{Result, VigilError};
use crate::schema::{
    check_in_logs, checkin_session_tokens, emergency_contacts, location_sharing_logs,
    notification_logs, personal_messages, reminder_settings, sos_events, users,
};
use crate::types::{
    CheckInLog, CheckInSessionToken, ConsentStatus, ContactType, EmergencyContact,
    LocationSharingLog, NotificationLog, PersonalMessage, ReminderSettings, SosEvent, SosStatus,
    User,
};

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct CheckInSettingsChangeset {
    check_in_cycle: Option<i32>,
    grace_period: Option<i32>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = emergency_contacts)]
struct ContactChangeset {
    name: Option<String>,
    priority: Option<i32>,
    updated_at: DateTime<Utc>,
}

/// Postgres-backed [`Store`] over a diesel-async deadpool.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .await
            .map_err(|e| VigilError::Internal(anyhow!("Failed to get database connection: {}", e)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: User) -> Result<User> {
        let mut conn = self.conn().await?;
        let inserted = diesel::insert_into(users::table)
            .values(&user)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await;

        match inserted {
            Ok(user) => Ok(user),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(VigilError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn update_check_in_settings(
        &self,
        user_id: Uuid,
        check_in_cycle: Option<i32>,
        grace_period: Option<i32>,
    ) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let changes = CheckInSettingsChangeset {
            check_in_cycle,
            grace_period,
            updated_at: Utc::now(),
        };
        Ok(diesel::update(users::table.find(user_id))
            .set(&changes)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?)
    }

    async fn set_push_token(&self, user_id: Uuid, fcm_token: Option<String>) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(users::table.find(user_id))
            .set((users::fcm_token.eq(fcm_token), users::updated_at.eq(Utc::now())))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?)
    }

    async fn set_location_consent(
        &self,
        user_id: Uuid,
        consent: bool,
        consent_at: Option<DateTime<Utc>>,
    ) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(users::table.find(user_id))
            .set((
                users::location_consent.eq(consent),
                users::location_consent_at.eq(consent_at),
                users::updated_at.eq(Utc::now()),
            ))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?)
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(users::table.find(user_id))
            .set((users::is_active.eq(false), users::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        // Owned rows go with the user through ON DELETE CASCADE
        let deleted = diesel::delete(users::table.find(user_id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn active_users_with_check_in(&self) -> Result<Vec<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .filter(users::is_active.eq(true))
            .filter(users::last_check_in.is_not_null())
            .select(User::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn reminder_candidates(&self) -> Result<Vec<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .filter(users::is_active.eq(true))
            .filter(users::last_check_in.is_not_null())
            .filter(users::fcm_token.is_not_null())
            .select(User::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn record_check_in(&self, log: CheckInLog) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let user = conn
            .transaction::<_, DieselError, _>(|conn| {
                async move {
                    let user = diesel::update(users::table.find(log.user_id))
                        .set((
                            users::last_check_in.eq(Some(log.checked_at)),
                            users::updated_at.eq(log.checked_at),
                        ))
                        .returning(User::as_returning())
                        .get_result(conn)
                        .await
                        .optional()?;

                    if user.is_some() {
                        diesel::insert_into(check_in_logs::table)
                            .values(&log)
                            .execute(conn)
                            .await?;
                    }
                    Ok(user)
                }
                .scope_boxed()
            })
            .await?;
        Ok(user)
    }

    async fn check_in_history(
        &self,
        user_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<CheckInLog>, i64)> {
        let mut conn = self.conn().await?;
        let total: i64 = check_in_logs::table
            .filter(check_in_logs::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await?;

        let logs = check_in_logs::table
            .filter(check_in_logs::user_id.eq(user_id))
            .order(check_in_logs::checked_at.desc())
            .offset(offset)
            .limit(limit)
            .select(CheckInLog::as_select())
            .load(&mut conn)
            .await?;

        Ok((logs, total))
    }

    async fn insert_session_token(&self, token: CheckInSessionToken) -> Result<CheckInSessionToken> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(checkin_session_tokens::table)
            .values(&token)
            .returning(CheckInSessionToken::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn get_session_token(&self, token: &str) -> Result<Option<CheckInSessionToken>> {
        let mut conn = self.conn().await?;
        Ok(checkin_session_tokens::table
            .filter(checkin_session_tokens::token.eq(token))
            .select(CheckInSessionToken::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn consume_session_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<CheckInSessionToken>> {
        let mut conn = self.conn().await?;
        // A concurrent consumer blocks on the row lock, then re-evaluates
        // `used_at IS NULL` and matches nothing.
        Ok(diesel::update(
            checkin_session_tokens::table
                .filter(checkin_session_tokens::token.eq(token))
                .filter(checkin_session_tokens::used_at.is_null())
                .filter(checkin_session_tokens::expires_at.gt(now)),
        )
        .set(checkin_session_tokens::used_at.eq(Some(now)))
        .returning(CheckInSessionToken::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?)
    }

    async fn delete_stale_session_tokens(
        &self,
        now: DateTime<Utc>,
        used_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut conn = self.conn().await?;
        let expired = diesel::delete(
            checkin_session_tokens::table.filter(checkin_session_tokens::expires_at.lt(now)),
        )
        .execute(&mut conn)
        .await?;

        let used = diesel::delete(
            checkin_session_tokens::table
                .filter(checkin_session_tokens::used_at.is_not_null())
                .filter(checkin_session_tokens::used_at.lt(used_before)),
        )
        .execute(&mut conn)
        .await?;

        Ok((expired + used) as u64)
    }

    async fn list_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        let mut conn = self.conn().await?;
        Ok(emergency_contacts::table
            .filter(emergency_contacts::user_id.eq(user_id))
            .order((emergency_contacts::priority.asc(), emergency_contacts::created_at.asc()))
            .select(EmergencyContact::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<Option<EmergencyContact>> {
        let mut conn = self.conn().await?;
        Ok(emergency_contacts::table
            .filter(emergency_contacts::id.eq(contact_id))
            .filter(emergency_contacts::user_id.eq(user_id))
            .select(EmergencyContact::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn count_contacts(&self, user_id: Uuid) -> Result<i64> {
        let mut conn = self.conn().await?;
        Ok(emergency_contacts::table
            .filter(emergency_contacts::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await?)
    }

    async fn contact_exists(
        &self,
        user_id: Uuid,
        contact_type: ContactType,
        contact_value: &str,
    ) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count: i64 = emergency_contacts::table
            .filter(emergency_contacts::user_id.eq(user_id))
            .filter(emergency_contacts::contact_type.eq(contact_type))
            .filter(emergency_contacts::contact_value.eq(contact_value))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn insert_contact(&self, contact: EmergencyContact) -> Result<EmergencyContact> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(emergency_contacts::table)
            .values(&contact)
            .returning(EmergencyContact::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn update_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: ContactUpdate,
    ) -> Result<Option<EmergencyContact>> {
        let mut conn = self.conn().await?;
        let changes = ContactChangeset {
            name: update.name,
            priority: update.priority,
            updated_at: Utc::now(),
        };
        Ok(diesel::update(
            emergency_contacts::table
                .filter(emergency_contacts::id.eq(contact_id))
                .filter(emergency_contacts::user_id.eq(user_id)),
        )
        .set(&changes)
        .returning(EmergencyContact::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?)
    }

    async fn delete_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = conn
            .transaction::<_, DieselError, _>(|conn| {
                async move {
                    let deleted = diesel::delete(
                        emergency_contacts::table
                            .filter(emergency_contacts::id.eq(contact_id))
                            .filter(emergency_contacts::user_id.eq(user_id)),
                    )
                    .execute(conn)
                    .await?;

                    if deleted == 0 {
                        return Ok(false);
                    }

                    let remaining: Vec<Uuid> = emergency_contacts::table
                        .filter(emergency_contacts::user_id.eq(user_id))
                        .order((emergency_contacts::priority.asc(), emergency_contacts::created_at.asc()))
                        .select(emergency_contacts::id)
                        .load(conn)
                        .await?;

                    for (index, id) in remaining.into_iter().enumerate() {
                        diesel::update(emergency_contacts::table.find(id))
                            .set(emergency_contacts::priority.eq(index as i32 + 1))
                            .execute(conn)
                            .await?;
                    }
                    Ok(true)
                }
                .scope_boxed()
            })
            .await?;
        Ok(deleted)
    }

    async fn set_consent_request(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        token: &str,
        requested_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(
            emergency_contacts::table
                .filter(emergency_contacts::id.eq(contact_id))
                .filter(emergency_contacts::user_id.eq(user_id)),
        )
        .set((
            emergency_contacts::status.eq(ConsentStatus::Pending),
            emergency_contacts::consent_token.eq(Some(token)),
            emergency_contacts::consent_requested_at.eq(Some(requested_at)),
            emergency_contacts::consent_expires_at.eq(Some(expires_at)),
            emergency_contacts::consent_responded_at.eq(None::<DateTime<Utc>>),
            emergency_contacts::updated_at.eq(requested_at),
        ))
        .returning(EmergencyContact::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?)
    }

    async fn find_contact_by_consent_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        let mut conn = self.conn().await?;
        Ok(emergency_contacts::table
            .filter(emergency_contacts::consent_token.eq(token))
            .filter(emergency_contacts::consent_expires_at.gt(now))
            .select(EmergencyContact::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn resolve_consent(
        &self,
        token: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        let mut conn = self.conn().await?;
        let status = if approved {
            ConsentStatus::Approved
        } else {
            ConsentStatus::Rejected
        };

        // Clearing the token in the same statement makes it single-use;
        // approval implies verification, rejection leaves the flag alone.
        Ok(diesel::update(
            emergency_contacts::table
                .filter(emergency_contacts::consent_token.eq(token))
                .filter(emergency_contacts::consent_expires_at.gt(now)),
        )
        .set((
            emergency_contacts::status.eq(status),
            emergency_contacts::consent_responded_at.eq(Some(now)),
            emergency_contacts::consent_token.eq(None::<String>),
            emergency_contacts::is_verified
                .eq(emergency_contacts::is_verified.or(approved.into_sql::<diesel::sql_types::Bool>())),
            emergency_contacts::updated_at.eq(now),
        ))
        .returning(EmergencyContact::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?)
    }

    async fn active_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        let mut conn = self.conn().await?;
        Ok(emergency_contacts::table
            .filter(emergency_contacts::user_id.eq(user_id))
            .filter(emergency_contacts::status.eq(ConsentStatus::Approved))
            .filter(emergency_contacts::is_verified.eq(true))
            .order((emergency_contacts::priority.asc(), emergency_contacts::created_at.asc()))
            .select(EmergencyContact::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn expire_stale_consents(&self, now: DateTime<Utc>, user_id: Option<Uuid>) -> Result<u64> {
        let mut conn = self.conn().await?;
        let changes = (
            emergency_contacts::status.eq(ConsentStatus::Expired),
            emergency_contacts::updated_at.eq(now),
        );
        let stale = emergency_contacts::table
            .filter(emergency_contacts::status.eq(ConsentStatus::Pending))
            .filter(emergency_contacts::consent_expires_at.lt(now));

        let expired = match user_id {
            Some(user_id) => {
                diesel::update(stale.filter(emergency_contacts::user_id.eq(user_id)))
                    .set(changes)
                    .execute(&mut conn)
                    .await?
            }
            None => diesel::update(stale).set(changes).execute(&mut conn).await?,
        };
        Ok(expired as u64)
    }

    async fn insert_sos_event(&self, event: SosEvent) -> Result<SosEvent> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(sos_events::table)
            .values(&event)
            .returning(SosEvent::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn get_sos_event(&self, event_id: Uuid) -> Result<Option<SosEvent>> {
        let mut conn = self.conn().await?;
        Ok(sos_events::table
            .find(event_id)
            .select(SosEvent::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn transition_sos(
        &self,
        event_id: Uuid,
        owner: Option<Uuid>,
        to: SosStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SosEvent>> {
        let (cancelled_at, sent_at) = match to {
            SosStatus::Cancelled => (Some(at), None),
            SosStatus::Sent => (None, Some(at)),
            SosStatus::Triggered => {
                return Err(VigilError::Validation(
                    "SOS events cannot return to triggered".to_string(),
                ))
            }
        };

        let mut conn = self.conn().await?;

        // Ownership never changes, so checking it before the swap is race-free
        if let Some(owner) = owner {
            let owned: Option<Uuid> = sos_events::table
                .filter(sos_events::id.eq(event_id))
                .filter(sos_events::user_id.eq(owner))
                .select(sos_events::id)
                .first(&mut conn)
                .await
                .optional()?;
            if owned.is_none() {
                return Ok(None);
            }
        }

        Ok(diesel::update(
            sos_events::table
                .filter(sos_events::id.eq(event_id))
                .filter(sos_events::status.eq(SosStatus::Triggered)),
        )
        .set((
            sos_events::status.eq(to),
            sos_events::cancelled_at.eq(cancelled_at),
            sos_events::sent_at.eq(sent_at),
        ))
        .returning(SosEvent::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?)
    }

    async fn active_sos_event(&self, user_id: Uuid) -> Result<Option<SosEvent>> {
        let mut conn = self.conn().await?;
        Ok(sos_events::table
            .filter(sos_events::user_id.eq(user_id))
            .filter(sos_events::status.eq(SosStatus::Triggered))
            .order(sos_events::triggered_at.desc())
            .select(SosEvent::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn list_sos_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<SosEvent>> {
        let mut conn = self.conn().await?;
        Ok(sos_events::table
            .filter(sos_events::user_id.eq(user_id))
            .order(sos_events::triggered_at.desc())
            .limit(limit)
            .select(SosEvent::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn stale_triggered_sos(&self, cutoff: DateTime<Utc>) -> Result<Vec<SosEvent>> {
        let mut conn = self.conn().await?;
        Ok(sos_events::table
            .filter(sos_events::status.eq(SosStatus::Triggered))
            .filter(sos_events::triggered_at.lt(cutoff))
            .order(sos_events::triggered_at.asc())
            .select(SosEvent::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn reminder_settings(&self, defaults: ReminderSettings) -> Result<ReminderSettings> {
        let mut conn = self.conn().await?;
        diesel::insert_into(reminder_settings::table)
            .values(&defaults)
            .on_conflict(reminder_settings::user_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(reminder_settings::table
            .filter(reminder_settings::user_id.eq(defaults.user_id))
            .select(ReminderSettings::as_select())
            .first(&mut conn)
            .await?)
    }

    async fn save_reminder_settings(&self, settings: ReminderSettings) -> Result<ReminderSettings> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(
            reminder_settings::table.filter(reminder_settings::user_id.eq(settings.user_id)),
        )
        .set((
            reminder_settings::reminder_hours_before.eq(&settings.reminder_hours_before),
            reminder_settings::quiet_hours_start.eq(settings.quiet_hours_start),
            reminder_settings::quiet_hours_end.eq(settings.quiet_hours_end),
            reminder_settings::preferred_time.eq(settings.preferred_time),
            reminder_settings::push_enabled.eq(settings.push_enabled),
            reminder_settings::email_enabled.eq(settings.email_enabled),
            reminder_settings::custom_message.eq(&settings.custom_message),
            reminder_settings::updated_at.eq(Utc::now()),
        ))
        .returning(ReminderSettings::as_returning())
        .get_result(&mut conn)
        .await?)
    }

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(notification_logs::table)
            .values(&log)
            .returning(NotificationLog::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn list_notification_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<NotificationLog>> {
        let mut conn = self.conn().await?;
        Ok(notification_logs::table
            .filter(notification_logs::user_id.eq(user_id))
            .order(notification_logs::created_at.desc())
            .limit(limit)
            .select(NotificationLog::as_select())
            .load(&mut conn)
            .await?)
    }

    async fn get_personal_message(&self, user_id: Uuid) -> Result<Option<PersonalMessage>> {
        let mut conn = self.conn().await?;
        Ok(personal_messages::table
            .filter(personal_messages::user_id.eq(user_id))
            .select(PersonalMessage::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn upsert_personal_message(&self, message: PersonalMessage) -> Result<PersonalMessage> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(personal_messages::table)
            .values(&message)
            .on_conflict(personal_messages::user_id)
            .do_update()
            .set((
                personal_messages::content.eq(&message.content),
                personal_messages::is_enabled.eq(message.is_enabled),
                personal_messages::updated_at.eq(message.updated_at),
            ))
            .returning(PersonalMessage::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn delete_personal_message(&self, user_id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            personal_messages::table.filter(personal_messages::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn insert_location_log(&self, log: LocationSharingLog) -> Result<LocationSharingLog> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(location_sharing_logs::table)
            .values(&log)
            .returning(LocationSharingLog::as_returning())
            .get_result(&mut conn)
            .await?)
    }

    async fn list_location_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<LocationSharingLog>> {
        let mut conn = self.conn().await?;
        Ok(location_sharing_logs::table
            .filter(location_sharing_logs::user_id.eq(user_id))
            .order(location_sharing_logs::shared_at.desc())
            .limit(limit)
            .select(LocationSharingLog::as_select())
            .load(&mut conn)
            .await?)
    }
}
