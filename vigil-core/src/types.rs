use chrono::{DateTime, NaiveTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::{
    check_in_logs, checkin_session_tokens, emergency_contacts, location_sharing_logs,
    notification_logs, personal_messages, reminder_settings, sos_events, users,
};

/// Declares a closed set of string values stored as `TEXT` columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

text_enum! {
    /// How a check-in was made.
    CheckInMethod {
        AppOpen => "app_open",
        ButtonClick => "button_click",
        PushResponse => "push_response",
        Widget => "widget",
        Quick => "quick",
    }
}

text_enum! {
    /// Consent of a third party to act as an emergency contact.
    ConsentStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Expired => "expired",
    }
}

text_enum! {
    ContactType {
        Email => "email",
        Sms => "sms",
    }
}

text_enum! {
    /// `Triggered` is the only non-terminal state.
    SosStatus {
        Triggered => "triggered",
        Cancelled => "cancelled",
        Sent => "sent",
    }
}

text_enum! {
    NotificationType {
        StatusAlert => "status_alert",
        PersonalMessage => "personal_message",
        SosAlert => "sos_alert",
    }
}

text_enum! {
    DeliveryStatus {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

impl Default for CheckInMethod {
    fn default() -> Self {
        CheckInMethod::ButtonClick
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub nickname: Option<String>,
    pub check_in_cycle: i32,
    pub grace_period: i32,
    pub last_check_in: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub fcm_token: Option<String>,
    pub is_active: bool,
    pub location_consent: bool,
    pub location_consent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub const DEFAULT_CHECK_IN_CYCLE: i32 = 7;
    pub const DEFAULT_GRACE_PERIOD: i32 = 48;

    pub fn new(email: impl Into<String>, nickname: Option<String>) -> Self {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            nickname,
            check_in_cycle: Self::DEFAULT_CHECK_IN_CYCLE,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            last_check_in: None,
            fcm_token: None,
            is_active: true,
            location_consent: false,
            location_consent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name used in messages to contacts.
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("A user")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = check_in_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CheckInLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub method: CheckInMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = checkin_session_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CheckInSessionToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CheckInSessionToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = emergency_contacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EmergencyContact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub contact_type: ContactType,
    pub contact_value: String,
    pub priority: i32,
    pub is_verified: bool,
    pub status: ConsentStatus,
    pub consent_requested_at: Option<DateTime<Utc>>,
    pub consent_responded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub consent_token: Option<String>,
    pub consent_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyContact {
    /// Only approved and verified contacts may receive automated alerts.
    pub fn is_eligible(&self) -> bool {
        self.status == ConsentStatus::Approved && self.is_verified
    }

    pub fn consent_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ConsentStatus::Pending
            && self.consent_expires_at.map(|at| at < now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = sos_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SosEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: SosStatus,
    pub triggered_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
}

impl SosEvent {
    pub fn map_link(&self) -> Option<String> {
        match (self.location_lat, self.location_lng) {
            (Some(lat), Some(lng)) => Some(format!("https://maps.google.com/maps?q={},{}", lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = reminder_settings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReminderSettings {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reminder_hours_before: Vec<i32>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub preferred_time: Option<NaiveTime>,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub custom_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderSettings {
    pub const DEFAULT_HOURS: [i32; 3] = [48, 24, 12];

    pub fn defaults_for(user_id: Uuid) -> Self {
        let now = Utc::now();
        ReminderSettings {
            id: Uuid::new_v4(),
            user_id,
            reminder_hours_before: Self::DEFAULT_HOURS.to_vec(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            preferred_time: None,
            push_enabled: true,
            email_enabled: false,
            custom_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = notification_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NotificationLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationLog {
    /// `sent_at` is stamped only for successful deliveries.
    pub fn new(
        user_id: Uuid,
        contact_id: Option<Uuid>,
        notification_type: NotificationType,
        status: DeliveryStatus,
        error_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        NotificationLog {
            id: Uuid::new_v4(),
            user_id,
            contact_id,
            notification_type,
            status,
            sent_at: (status == DeliveryStatus::Sent).then_some(now),
            error_message,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = personal_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PersonalMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Ciphertext, see [`crate::encryption`].
    #[serde(skip_serializing)]
    pub content: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = location_sharing_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LocationSharingLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub recipient_ids: Vec<Uuid>,
    pub shared_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!("approved".parse::<ConsentStatus>().unwrap(), ConsentStatus::Approved);
        assert_eq!(SosStatus::Cancelled.as_str(), "cancelled");
        assert!("bogus".parse::<ContactType>().is_err());
        assert_eq!(
            serde_json::to_string(&CheckInMethod::PushResponse).unwrap(),
            "\"push_response\""
        );
    }

    #[test]
    fn test_contact_eligibility() {
        let now = Utc::now();
        let mut contact = EmergencyContact {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Kim".to_string(),
            contact_type: ContactType::Email,
            contact_value: "kim@example.com".to_string(),
            priority: 1,
            is_verified: true,
            status: ConsentStatus::Pending,
            consent_requested_at: None,
            consent_responded_at: None,
            consent_token: None,
            consent_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!contact.is_eligible());
        contact.status = ConsentStatus::Approved;
        assert!(contact.is_eligible());
        contact.is_verified = false;
        assert!(!contact.is_eligible());
    }

    #[test]
    fn test_sos_map_link() {
        let mut event = SosEvent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: SosStatus::Triggered,
            triggered_at: Utc::now(),
            cancelled_at: None,
            sent_at: None,
            location_lat: Some(37.5665),
            location_lng: None,
        };
        assert_eq!(event.map_link(), None);
        event.location_lng = Some(126.978);
        assert_eq!(
            event.map_link().as_deref(),
            Some("https://maps.google.com/maps?q=37.5665,126.978")
        );
    }
}
