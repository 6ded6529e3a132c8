//! Request handlers.

pub mod admin;
pub mod auth;
pub mod content;
pub mod health;
pub mod streaming;
pub mod subscriptions;
pub mod users;
pub mod webhooks;

pub use health::*;
