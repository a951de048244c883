pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod delivery;
pub mod encryption;
pub mod error;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod token;
pub mod types;

pub use config::Config;
pub use context::VigilContext;
pub use db::DbPool;
pub use delivery::{html_escape, EmailMessage, EmailSender, PushMessage, PushSender};
pub use encryption::{decrypt_content, encrypt_content};
pub use error::{Result, VigilError};
pub use store::Store;
