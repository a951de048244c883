//! Provider adapters behind the [`EmailSender`](vigil_core::EmailSender) and
//! [`PushSender`](vigil_core::PushSender) seams.

pub mod email;
pub mod fcm;

pub use email::EmailDelivery;
pub use fcm::FcmDelivery;
