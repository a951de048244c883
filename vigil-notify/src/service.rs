use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;
use vigil_core::types::{
    ContactType, DeliveryStatus, EmergencyContact, NotificationLog, NotificationType, SosEvent, User,
};
use vigil_core::{EmailMessage, PushMessage, Result, VigilContext};
use vigil_engine::{ConsentService, LocationService, PersonalMessageService};

use crate::templates;

/// Outcome of a missed check-in fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub alerts_sent: usize,
    pub messages_sent: usize,
}

/// Fans alerts out to a user's consented contacts and reminders to the user.
///
/// Delivery is best effort: each destination is attempted independently and
/// bounded by the configured delivery timeout. Once the first send is made,
/// neither a failed send nor a failed log write stops the remaining sends.
/// Storage reads that happen before any send do propagate.
pub struct NotificationService {
    ctx: VigilContext,
}

impl NotificationService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.delivery.timeout_secs)
    }

    async fn deliver_email(&self, message: &EmailMessage) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.timeout(), self.ctx.email.send_email(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("delivery timed out after {:?}", self.timeout())),
        }
    }

    async fn deliver_push(&self, message: &PushMessage) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.timeout(), self.ctx.push.send_push(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("delivery timed out after {:?}", self.timeout())),
        }
    }

    /// Send one e-mail to a contact and record the attempt. Returns whether
    /// the send succeeded, regardless of the log write.
    async fn email_contact(
        &self,
        user: &User,
        contact: &EmergencyContact,
        notification_type: NotificationType,
        message: EmailMessage,
    ) -> bool {
        let outcome = self.deliver_email(&message).await;
        let (status, error) = match &outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => {
                tracing::warn!(
                    "Failed to send {} to contact {} of user {}: {}",
                    notification_type,
                    contact.id,
                    user.id,
                    e
                );
                (DeliveryStatus::Failed, Some(e.clone()))
            }
        };

        if let Err(e) = self
            .ctx
            .store
            .insert_notification_log(NotificationLog::new(
                user.id,
                Some(contact.id),
                notification_type,
                status,
                error,
            ))
            .await
        {
            tracing::error!(
                "Failed to record {} for contact {} of user {}: {}",
                notification_type,
                contact.id,
                user.id,
                e
            );
        }
        outcome.is_ok()
    }

    /// Consented contacts that can actually be reached. SMS contacts are
    /// kept in the data model but have no dispatch path.
    pub async fn reachable_contacts(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        let contacts = ConsentService::new(self.ctx.clone()).active_contacts(user_id).await?;
        Ok(contacts
            .into_iter()
            .filter(|c| {
                if c.contact_type != ContactType::Email {
                    tracing::info!("Contact {} is not an e-mail contact, skipping", c.id);
                    return false;
                }
                true
            })
            .collect())
    }

    pub async fn alert_missed_check_in(&self, user: &User, days_since: i64) -> Result<AlertSummary> {
        let app_name = &self.ctx.config.app.name;
        let contacts = self.reachable_contacts(user.id).await?;
        let personal_message = if contacts.is_empty() {
            None
        } else {
            PersonalMessageService::new(self.ctx.clone())
                .for_notification(user.id)
                .await?
        };

        let mut summary = AlertSummary::default();
        for contact in &contacts {
            let alert = templates::status_alert_email(
                app_name,
                user.display_name(),
                &contact.name,
                days_since,
                &contact.contact_value,
            );
            if self
                .email_contact(user, contact, NotificationType::StatusAlert, alert)
                .await
            {
                summary.alerts_sent += 1;
            }

            if let Some(content) = &personal_message {
                let message = templates::personal_message_email(
                    app_name,
                    user.display_name(),
                    &contact.name,
                    content,
                    &contact.contact_value,
                );
                if self
                    .email_contact(user, contact, NotificationType::PersonalMessage, message)
                    .await
                {
                    summary.messages_sent += 1;
                }
            }
        }

        tracing::info!(
            "Missed check-in alerts for user {}: {} of {} contacts reached, {} personal messages",
            user.id,
            summary.alerts_sent,
            contacts.len(),
            summary.messages_sent
        );
        Ok(summary)
    }

    /// Alert `contacts`, normally the result of
    /// [`reachable_contacts`](Self::reachable_contacts) read before the event
    /// was claimed. Returns the number of contacts reached.
    pub async fn alert_sos(&self, user: &User, event: &SosEvent, contacts: &[EmergencyContact]) -> usize {
        let map_link = event.map_link();

        let mut sent = 0;
        for contact in contacts {
            let alert = templates::sos_alert_email(
                &self.ctx.config.app.name,
                user.display_name(),
                &contact.name,
                map_link.as_deref(),
                &contact.contact_value,
            );
            if self
                .email_contact(user, contact, NotificationType::SosAlert, alert)
                .await
            {
                sent += 1;
            }
        }

        if map_link.is_some() && !contacts.is_empty() {
            if let Err(e) = LocationService::new(self.ctx.clone())
                .log_sharing(
                    user.id,
                    "sos",
                    event.location_lat,
                    event.location_lng,
                    contacts.iter().map(|c| c.id).collect(),
                )
                .await
            {
                tracing::error!("Failed to record location sharing for SOS {}: {}", event.id, e);
            }
        }

        tracing::info!("SOS {} alerts: {} of {} contacts reached", event.id, sent, contacts.len());
        sent
    }

    fn deep_link(&self, token: &str) -> String {
        format!("{}?auto=true&token={}", self.ctx.config.app.deep_link_base, token)
    }

    async fn push_user(&self, user: &User, title: String, body: String, data: BTreeMap<String, String>) -> bool {
        let Some(fcm_token) = user.fcm_token.as_deref() else {
            tracing::info!("User {} has no push token, skipping reminder", user.id);
            return false;
        };

        let message = PushMessage {
            token: fcm_token.to_string(),
            title,
            body,
            data,
        };
        match self.deliver_push(&message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to send reminder to user {}: {}", user.id, e);
                false
            }
        }
    }

    /// Regular reminder carrying a quick check-in token.
    pub async fn send_reminder(
        &self,
        user: &User,
        days_remaining: i64,
        token: &str,
        custom_message: Option<&str>,
    ) -> bool {
        let (title, body) = templates::reminder_push(days_remaining);
        let body = custom_message.map(str::to_string).unwrap_or(body);
        let data = BTreeMap::from([
            ("type".to_string(), "checkin_reminder".to_string()),
            ("days_remaining".to_string(), days_remaining.to_string()),
            ("token".to_string(), token.to_string()),
            ("deep_link".to_string(), self.deep_link(token)),
        ]);
        self.push_user(user, title, body, data).await
    }

    /// Grace-period reminder carrying a quick check-in token.
    pub async fn send_urgent_reminder(&self, user: &User, token: &str, custom_message: Option<&str>) -> bool {
        let (title, body) = templates::urgent_reminder_push();
        let body = custom_message.map(str::to_string).unwrap_or(body);
        let data = BTreeMap::from([
            ("type".to_string(), "urgent_reminder".to_string()),
            ("token".to_string(), token.to_string()),
            ("deep_link".to_string(), self.deep_link(token)),
        ]);
        self.push_user(user, title, body, data).await
    }

    /// E-mail the consent link to a contact with an outstanding request.
    /// Returns false for SMS contacts and contacts without a live token.
    pub async fn send_consent_request(&self, user: &User, contact: &EmergencyContact) -> bool {
        let (Some(token), Some(expires_at)) = (&contact.consent_token, contact.consent_expires_at) else {
            return false;
        };
        if contact.contact_type != ContactType::Email {
            tracing::info!("Contact {} is not an e-mail contact, consent request not sent", contact.id);
            return false;
        }

        let url = format!(
            "{}/api/v1/consent/{}",
            self.ctx.config.app.public_base_url.trim_end_matches('/'),
            token
        );
        let message = templates::consent_request_email(
            &self.ctx.config.app.name,
            user.display_name(),
            &contact.name,
            &url,
            expires_at,
            &contact.contact_value,
        );
        match self.deliver_email(&message).await {
            Ok(()) => {
                tracing::info!("Consent request sent to contact {}", contact.id);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send consent request to contact {}: {}", contact.id, e);
                false
            }
        }
    }
}
