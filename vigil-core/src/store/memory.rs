use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ContactUpdate, Store};
use crate::error::{Result, VigilError};
use crate::types::{
    CheckInLog, CheckInSessionToken, ConsentStatus, ContactType, EmergencyContact,
    LocationSharingLog, NotificationLog, PersonalMessage, ReminderSettings, SosEvent, SosStatus,
    User,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    check_ins: Vec<CheckInLog>,
    session_tokens: Vec<CheckInSessionToken>,
    contacts: Vec<EmergencyContact>,
    sos_events: Vec<SosEvent>,
    reminder_settings: HashMap<Uuid, ReminderSettings>,
    notification_logs: Vec<NotificationLog>,
    personal_messages: HashMap<Uuid, PersonalMessage>,
    location_logs: Vec<LocationSharingLog>,
    failing_log_writes: usize,
}

impl State {
    fn sorted_contacts(&self, user_id: Uuid) -> Vec<EmergencyContact> {
        let mut contacts: Vec<EmergencyContact> = self
            .contacts
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| (c.priority, c.created_at));
        contacts
    }
}

/// In-process [`Store`] for tests. Each method holds one lock for its whole
/// body, which gives the same atomicity as the Postgres statements.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrite a user row directly, bypassing domain rules.
    pub fn put_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    /// Overwrite a contact row directly, bypassing domain rules.
    pub fn put_contact(&self, contact: EmergencyContact) {
        let mut state = self.lock();
        state.contacts.retain(|c| c.id != contact.id);
        state.contacts.push(contact);
    }

    pub fn check_in_count(&self, user_id: Uuid) -> usize {
        self.lock().check_ins.iter().filter(|l| l.user_id == user_id).count()
    }

    pub fn session_token_count(&self) -> usize {
        self.lock().session_tokens.len()
    }

    /// Make the next `count` notification log writes fail.
    pub fn fail_notification_log_writes(&self, count: usize) {
        self.lock().failing_log_writes = count;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(VigilError::DuplicateEmail);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn update_check_in_settings(
        &self,
        user_id: Uuid,
        check_in_cycle: Option<i32>,
        grace_period: Option<i32>,
    ) -> Result<Option<User>> {
        let mut state = self.lock();
        Ok(state.users.get_mut(&user_id).map(|user| {
            if let Some(cycle) = check_in_cycle {
                user.check_in_cycle = cycle;
            }
            if let Some(grace) = grace_period {
                user.grace_period = grace;
            }
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_push_token(&self, user_id: Uuid, fcm_token: Option<String>) -> Result<Option<User>> {
        let mut state = self.lock();
        Ok(state.users.get_mut(&user_id).map(|user| {
            user.fcm_token = fcm_token;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_location_consent(
        &self,
        user_id: Uuid,
        consent: bool,
        consent_at: Option<DateTime<Utc>>,
    ) -> Result<Option<User>> {
        let mut state = self.lock();
        Ok(state.users.get_mut(&user_id).map(|user| {
            user.location_consent = consent;
            user.location_consent_at = consent_at;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        Ok(match state.users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = false;
                user.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        if state.users.remove(&user_id).is_none() {
            return Ok(false);
        }
        state.check_ins.retain(|r| r.user_id != user_id);
        state.session_tokens.retain(|r| r.user_id != user_id);
        state.contacts.retain(|r| r.user_id != user_id);
        state.sos_events.retain(|r| r.user_id != user_id);
        state.reminder_settings.remove(&user_id);
        state.notification_logs.retain(|r| r.user_id != user_id);
        state.personal_messages.remove(&user_id);
        state.location_logs.retain(|r| r.user_id != user_id);
        Ok(true)
    }

    async fn active_users_with_check_in(&self) -> Result<Vec<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.is_active && u.last_check_in.is_some())
            .cloned()
            .collect())
    }

    async fn reminder_candidates(&self) -> Result<Vec<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.is_active && u.last_check_in.is_some() && u.fcm_token.is_some())
            .cloned()
            .collect())
    }

    async fn record_check_in(&self, log: CheckInLog) -> Result<Option<User>> {
        let mut state = self.lock();
        let user = match state.users.get_mut(&log.user_id) {
            Some(user) => {
                user.last_check_in = Some(log.checked_at);
                user.updated_at = log.checked_at;
                user.clone()
            }
            None => return Ok(None),
        };
        state.check_ins.push(log);
        Ok(Some(user))
    }

    async fn check_in_history(
        &self,
        user_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<CheckInLog>, i64)> {
        let state = self.lock();
        let mut logs: Vec<CheckInLog> = state
            .check_ins
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        let total = logs.len() as i64;
        let page = logs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn insert_session_token(&self, token: CheckInSessionToken) -> Result<CheckInSessionToken> {
        self.lock().session_tokens.push(token.clone());
        Ok(token)
    }

    async fn get_session_token(&self, token: &str) -> Result<Option<CheckInSessionToken>> {
        Ok(self
            .lock()
            .session_tokens
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn consume_session_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<CheckInSessionToken>> {
        let mut state = self.lock();
        Ok(state
            .session_tokens
            .iter_mut()
            .find(|t| t.token == token && t.is_usable(now))
            .map(|t| {
                t.used_at = Some(now);
                t.clone()
            }))
    }

    async fn delete_stale_session_tokens(
        &self,
        now: DateTime<Utc>,
        used_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.lock();
        let before = state.session_tokens.len();
        state.session_tokens.retain(|t| {
            let expired = t.expires_at < now;
            let used_long_ago = t.used_at.map(|at| at < used_before).unwrap_or(false);
            !(expired || used_long_ago)
        });
        Ok((before - state.session_tokens.len()) as u64)
    }

    async fn list_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        Ok(self.lock().sorted_contacts(user_id))
    }

    async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<Option<EmergencyContact>> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .find(|c| c.id == contact_id && c.user_id == user_id)
            .cloned())
    }

    async fn count_contacts(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.lock().contacts.iter().filter(|c| c.user_id == user_id).count() as i64)
    }

    async fn contact_exists(
        &self,
        user_id: Uuid,
        contact_type: ContactType,
        contact_value: &str,
    ) -> Result<bool> {
        Ok(self.lock().contacts.iter().any(|c| {
            c.user_id == user_id && c.contact_type == contact_type && c.contact_value == contact_value
        }))
    }

    async fn insert_contact(&self, contact: EmergencyContact) -> Result<EmergencyContact> {
        self.lock().contacts.push(contact.clone());
        Ok(contact)
    }

    async fn update_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: ContactUpdate,
    ) -> Result<Option<EmergencyContact>> {
        let mut state = self.lock();
        Ok(state
            .contacts
            .iter_mut()
            .find(|c| c.id == contact_id && c.user_id == user_id)
            .map(|c| {
                if let Some(name) = update.name {
                    c.name = name;
                }
                if let Some(priority) = update.priority {
                    c.priority = priority;
                }
                c.updated_at = Utc::now();
                c.clone()
            }))
    }

    async fn delete_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        let before = state.contacts.len();
        state
            .contacts
            .retain(|c| !(c.id == contact_id && c.user_id == user_id));
        if state.contacts.len() == before {
            return Ok(false);
        }

        let order: Vec<Uuid> = state.sorted_contacts(user_id).iter().map(|c| c.id).collect();
        for contact in state.contacts.iter_mut().filter(|c| c.user_id == user_id) {
            if let Some(index) = order.iter().position(|id| *id == contact.id) {
                contact.priority = index as i32 + 1;
            }
        }
        Ok(true)
    }

    async fn set_consent_request(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        token: &str,
        requested_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        let mut state = self.lock();
        Ok(state
            .contacts
            .iter_mut()
            .find(|c| c.id == contact_id && c.user_id == user_id)
            .map(|c| {
                c.status = ConsentStatus::Pending;
                c.consent_token = Some(token.to_string());
                c.consent_requested_at = Some(requested_at);
                c.consent_expires_at = Some(expires_at);
                c.consent_responded_at = None;
                c.updated_at = requested_at;
                c.clone()
            }))
    }

    async fn find_contact_by_consent_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .find(|c| {
                c.consent_token.as_deref() == Some(token)
                    && c.consent_expires_at.map(|at| at > now).unwrap_or(false)
            })
            .cloned())
    }

    async fn resolve_consent(
        &self,
        token: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyContact>> {
        let mut state = self.lock();
        Ok(state
            .contacts
            .iter_mut()
            .find(|c| {
                c.consent_token.as_deref() == Some(token)
                    && c.consent_expires_at.map(|at| at > now).unwrap_or(false)
            })
            .map(|c| {
                c.status = if approved {
                    ConsentStatus::Approved
                } else {
                    ConsentStatus::Rejected
                };
                c.consent_responded_at = Some(now);
                c.consent_token = None;
                c.is_verified = c.is_verified || approved;
                c.updated_at = now;
                c.clone()
            }))
    }

    async fn active_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        Ok(self
            .lock()
            .sorted_contacts(user_id)
            .into_iter()
            .filter(EmergencyContact::is_eligible)
            .collect())
    }

    async fn expire_stale_consents(&self, now: DateTime<Utc>, user_id: Option<Uuid>) -> Result<u64> {
        let mut state = self.lock();
        let mut expired = 0;
        for contact in state.contacts.iter_mut() {
            if user_id.map(|id| id == contact.user_id).unwrap_or(true) && contact.consent_lapsed(now) {
                contact.status = ConsentStatus::Expired;
                contact.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_sos_event(&self, event: SosEvent) -> Result<SosEvent> {
        self.lock().sos_events.push(event.clone());
        Ok(event)
    }

    async fn get_sos_event(&self, event_id: Uuid) -> Result<Option<SosEvent>> {
        Ok(self.lock().sos_events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn transition_sos(
        &self,
        event_id: Uuid,
        owner: Option<Uuid>,
        to: SosStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SosEvent>> {
        if to == SosStatus::Triggered {
            return Err(VigilError::Validation(
                "SOS events cannot return to triggered".to_string(),
            ));
        }

        let mut state = self.lock();
        Ok(state
            .sos_events
            .iter_mut()
            .find(|e| {
                e.id == event_id
                    && e.status == SosStatus::Triggered
                    && owner.map(|o| o == e.user_id).unwrap_or(true)
            })
            .map(|e| {
                e.status = to;
                match to {
                    SosStatus::Cancelled => e.cancelled_at = Some(at),
                    _ => e.sent_at = Some(at),
                }
                e.clone()
            }))
    }

    async fn active_sos_event(&self, user_id: Uuid) -> Result<Option<SosEvent>> {
        Ok(self
            .lock()
            .sos_events
            .iter()
            .filter(|e| e.user_id == user_id && e.status == SosStatus::Triggered)
            .max_by_key(|e| e.triggered_at)
            .cloned())
    }

    async fn list_sos_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<SosEvent>> {
        let mut events: Vec<SosEvent> = self
            .lock()
            .sos_events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn stale_triggered_sos(&self, cutoff: DateTime<Utc>) -> Result<Vec<SosEvent>> {
        let mut events: Vec<SosEvent> = self
            .lock()
            .sos_events
            .iter()
            .filter(|e| e.status == SosStatus::Triggered && e.triggered_at < cutoff)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.triggered_at);
        Ok(events)
    }

    async fn reminder_settings(&self, defaults: ReminderSettings) -> Result<ReminderSettings> {
        let mut state = self.lock();
        Ok(state
            .reminder_settings
            .entry(defaults.user_id)
            .or_insert(defaults)
            .clone())
    }

    async fn save_reminder_settings(&self, mut settings: ReminderSettings) -> Result<ReminderSettings> {
        settings.updated_at = Utc::now();
        self.lock()
            .reminder_settings
            .insert(settings.user_id, settings.clone());
        Ok(settings)
    }

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog> {
        let mut state = self.lock();
        if state.failing_log_writes > 0 {
            state.failing_log_writes -= 1;
            return Err(VigilError::Internal(anyhow::anyhow!("notification log write failed")));
        }
        state.notification_logs.push(log.clone());
        Ok(log)
    }

    async fn list_notification_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<NotificationLog>> {
        let mut logs: Vec<NotificationLog> = self
            .lock()
            .notification_logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn get_personal_message(&self, user_id: Uuid) -> Result<Option<PersonalMessage>> {
        Ok(self.lock().personal_messages.get(&user_id).cloned())
    }

    async fn upsert_personal_message(&self, message: PersonalMessage) -> Result<PersonalMessage> {
        let mut state = self.lock();
        let stored = state
            .personal_messages
            .entry(message.user_id)
            .and_modify(|existing| {
                existing.content = message.content.clone();
                existing.is_enabled = message.is_enabled;
                existing.updated_at = message.updated_at;
            })
            .or_insert_with(|| message.clone());
        Ok(stored.clone())
    }

    async fn delete_personal_message(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.lock().personal_messages.remove(&user_id).is_some())
    }

    async fn insert_location_log(&self, log: LocationSharingLog) -> Result<LocationSharingLog> {
        self.lock().location_logs.push(log.clone());
        Ok(log)
    }

    async fn list_location_logs(&self, user_id: Uuid, limit: i64) -> Result<Vec<LocationSharingLog>> {
        let mut logs: Vec<LocationSharingLog> = self
            .lock()
            .location_logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.shared_at.cmp(&a.shared_at));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }
}
