//! Axum HTTP API server for the onflix streaming platform.
//!
//! This crate provides:
//! - Account, profile and catalog endpoints
//! - Stripe subscription lifecycle and webhook processing
//! - Entitlement-gated, signed streaming URLs
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
