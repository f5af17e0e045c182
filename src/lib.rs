//! Meetpoint - proximity session manager
//!
//! Venue check-ins with TTL expiry, exclusive per-user sessions, a
//! message-capped chat lifecycle and a delayed-job expiry scheduler.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod scheduler;
pub mod services;
