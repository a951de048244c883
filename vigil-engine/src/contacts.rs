use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use uuid::Uuid;
use vigil_core::store::ContactUpdate;
use vigil_core::types::{ConsentStatus, ContactType, EmergencyContact};
use vigil_core::{Result, VigilContext, VigilError};

pub const MAX_CONTACTS: usize = 3;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_VALUE_LEN: usize = 255;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("invalid email pattern")
});

static MOBILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+?82|0)?1[0-9]{8,9}$").expect("invalid mobile pattern"));

static PHONE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-\.\(\)]").expect("invalid separator pattern"));

pub fn validate_email(value: &str) -> bool {
    EMAIL_PATTERN.is_match(value)
}

/// Strip separators (spaces, `-`, `.`, parentheses) from a phone number.
pub fn normalize_phone(value: &str) -> String {
    PHONE_SEPARATORS.replace_all(value, "").into_owned()
}

pub fn validate_phone(value: &str) -> bool {
    MOBILE_PATTERN.is_match(&normalize_phone(value))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub contact_type: ContactType,
    pub contact_value: String,
    #[serde(default)]
    pub priority: Option<i32>,
}

pub struct ContactService {
    ctx: VigilContext,
}

impl ContactService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<EmergencyContact>> {
        self.ctx.store.list_contacts(user_id).await
    }

    pub async fn get(&self, user_id: Uuid, contact_id: Uuid) -> Result<EmergencyContact> {
        self.ctx
            .store
            .get_contact(user_id, contact_id)
            .await?
            .ok_or(VigilError::ContactNotFound)
    }

    /// New contacts start `pending` and unverified; consent is requested separately.
    pub async fn create(&self, user_id: Uuid, input: NewContact) -> Result<EmergencyContact> {
        let name = input.name.trim().to_string();
        validate_name(&name)?;
        let priority = input.priority.unwrap_or(1);
        validate_priority(priority)?;

        let value = input.contact_value.trim().to_string();
        if value.is_empty() || value.chars().count() > MAX_VALUE_LEN {
            return Err(VigilError::Validation(format!(
                "contact_value must be 1 to {} characters",
                MAX_VALUE_LEN
            )));
        }
        let valid = match input.contact_type {
            ContactType::Email => validate_email(&value),
            ContactType::Sms => validate_phone(&value),
        };
        if !valid {
            return Err(VigilError::InvalidContactValue {
                kind: input.contact_type.to_string(),
            });
        }

        if self.ctx.store.count_contacts(user_id).await? >= MAX_CONTACTS as i64 {
            return Err(VigilError::MaxContactsExceeded(MAX_CONTACTS));
        }
        if self
            .ctx
            .store
            .contact_exists(user_id, input.contact_type, &value)
            .await?
        {
            return Err(VigilError::DuplicateContact);
        }

        let now = Utc::now();
        let contact = EmergencyContact {
            id: Uuid::new_v4(),
            user_id,
            name,
            contact_type: input.contact_type,
            contact_value: value,
            priority,
            is_verified: false,
            status: ConsentStatus::Pending,
            consent_requested_at: None,
            consent_responded_at: None,
            consent_token: None,
            consent_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        let contact = self.ctx.store.insert_contact(contact).await?;
        tracing::info!("Created emergency contact {} for user {}", contact.id, user_id);
        Ok(contact)
    }

    /// Name and priority are the only mutable fields.
    pub async fn update(&self, user_id: Uuid, contact_id: Uuid, mut update: ContactUpdate) -> Result<EmergencyContact> {
        if let Some(name) = update.name.take() {
            let name = name.trim().to_string();
            validate_name(&name)?;
            update.name = Some(name);
        }
        if let Some(priority) = update.priority {
            validate_priority(priority)?;
        }

        self.ctx
            .store
            .update_contact(user_id, contact_id, update)
            .await?
            .ok_or(VigilError::ContactNotFound)
    }

    /// Remaining contacts are renumbered 1..n in their previous order.
    pub async fn delete(&self, user_id: Uuid, contact_id: Uuid) -> Result<()> {
        if !self.ctx.store.delete_contact(user_id, contact_id).await? {
            return Err(VigilError::ContactNotFound);
        }
        tracing::info!("Deleted emergency contact {} for user {}", contact_id, user_id);
        Ok(())
    }

    /// Legacy verification entry point. Verification now happens through
    /// consent approval, so this only confirms the contact exists.
    pub async fn verify(&self, user_id: Uuid, contact_id: Uuid) -> Result<EmergencyContact> {
        self.get(user_id, contact_id).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(VigilError::Validation(format!(
            "name must be 1 to {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_priority(priority: i32) -> Result<()> {
    if !(1..=MAX_CONTACTS as i32).contains(&priority) {
        return Err(VigilError::Validation(format!(
            "priority must be between 1 and {}",
            MAX_CONTACTS
        )));
    }
    Ok(())
}
