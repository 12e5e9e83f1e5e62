//! Core library for the chat-to-repository bridge — shared types, the
//! persistent store, settings, crypto, and the Markdown grammars committed
//! into each user's repository.

pub mod config;
pub mod crypto;
pub mod error;
pub mod markdown;
pub mod model;
pub mod settings;
pub mod store;

pub use error::BridgeError;
pub use model::{
    BuiltinFileType, Insights, PendingPayload, PremiumState, Tier, TopupLog, UsagePeriod, User,
};
pub use store::{SqliteStore, StoreError};
