//! The webhook HTTP surface: Stripe-style payment events and the GitHub
//! OAuth callback. Runs independent of
//! the chat loop so a chat outage never drops a payment event.

pub mod oauth_callback;
pub mod payment;
pub mod server;

pub use payment::{PaymentData, PaymentType};
pub use server::{build_router, AppState, ChatNotifier};
