#![doc = include_str!("../README.md")]

pub mod api;
pub mod claims;
pub mod config;
pub mod error;
pub mod redirect;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use api::{ApiClient, AuthApi};
pub use config::AuthConfig;
pub use error::{ApiError, Outcome};
pub use redirect::{one_time_token_from_query, Destination, RedirectPolicy};
pub use session::{is_expired, SessionManager, GRACE_PERIOD_SECS};
pub use store::{CredentialStore, FileStore, MemoryStore};
pub use types::{AuthTokens, RegisterRequest, UserProfile};
