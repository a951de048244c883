//! Fakes shared by the test suites of every crate in the workspace.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::context::VigilContext;
use crate::delivery::{EmailMessage, EmailSender, PushMessage, PushSender};
use crate::store::MemoryStore;
use crate::types::{ConsentStatus, ContactType, EmergencyContact, User};

/// Records every e-mail and push it is asked to send. Destinations added
/// with [`RecordingDelivery::fail_for`] are rejected.
#[derive(Default)]
pub struct RecordingDelivery {
    emails: Mutex<Vec<EmailMessage>>,
    pushes: Mutex<Vec<PushMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, destination: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(destination.to_string());
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pushes(&self) -> Vec<PushMessage> {
        self.pushes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_failing(&self, destination: &str) -> bool {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(destination)
    }
}

#[async_trait]
impl EmailSender for RecordingDelivery {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        if self.is_failing(&message.to) {
            return Err(anyhow!("provider rejected {}", message.to));
        }
        self.emails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl PushSender for RecordingDelivery {
    async fn send_push(&self, message: &PushMessage) -> Result<()> {
        if self.is_failing(&message.token) {
            return Err(anyhow!("provider rejected {}", message.token));
        }
        self.pushes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

pub struct TestHarness {
    pub ctx: VigilContext,
    pub store: Arc<MemoryStore>,
    pub delivery: Arc<RecordingDelivery>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let ctx = VigilContext::new(config, store.clone(), delivery.clone(), delivery.clone());
        TestHarness { ctx, store, delivery }
    }

    /// Active user with the default cycle and grace period.
    pub fn user(&self, last_check_in: Option<DateTime<Utc>>) -> User {
        let mut user = User::new(format!("{}@example.com", Uuid::new_v4()), Some("Jamie".to_string()));
        user.last_check_in = last_check_in;
        self.store.put_user(user.clone());
        user
    }

    /// Contact in the given consent state, stored directly.
    pub fn contact(
        &self,
        user_id: Uuid,
        contact_type: ContactType,
        value: &str,
        status: ConsentStatus,
        is_verified: bool,
    ) -> EmergencyContact {
        let now = Utc::now();
        let contact = EmergencyContact {
            id: Uuid::new_v4(),
            user_id,
            name: "Contact".to_string(),
            contact_type,
            contact_value: value.to_string(),
            priority: 1,
            is_verified,
            status,
            consent_requested_at: None,
            consent_responded_at: None,
            consent_token: None,
            consent_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_contact(contact.clone());
        contact
    }

    /// Approved, verified e-mail contact.
    pub fn approved_contact(&self, user_id: Uuid, email: &str) -> EmergencyContact {
        self.contact(user_id, ContactType::Email, email, ConsentStatus::Approved, true)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
