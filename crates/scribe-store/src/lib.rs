pub mod configs;
pub mod convlog;
pub mod db;
pub mod error;
pub mod types;

pub use configs::ServerConfigStore;
pub use convlog::ConversationLog;
pub use error::{Result, StoreError};
pub use types::{ConversationTurn, ServerConfig, TurnRole};
