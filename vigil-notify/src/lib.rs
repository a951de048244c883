pub mod service;
pub mod templates;

pub use service::{AlertSummary, NotificationService};
