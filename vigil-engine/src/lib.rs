//! Domain services: liveness, consent, SOS, reminders and the account data
//! they depend on. Every service is a thin struct over [`VigilContext`].
//!
//! [`VigilContext`]: vigil_core::VigilContext

pub mod account;
pub mod checkin;
pub mod consent;
pub mod contacts;
pub mod location;
pub mod message;
pub mod reminder;
pub mod session;
pub mod sos;

pub use account::AccountService;
pub use checkin::{CheckInReceipt, CheckInService, CheckInStatus};
pub use consent::ConsentService;
pub use contacts::{ContactService, NewContact};
pub use location::LocationService;
pub use message::PersonalMessageService;
pub use reminder::{ReminderService, ReminderSettingsUpdate};
pub use session::SessionTokenService;
pub use sos::SosService;
