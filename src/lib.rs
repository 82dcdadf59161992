//! tipbot - Telegram tipster-bot supervisor
//!
//! This daemon owns one bot identity: its license/subscription state
//! machine, the fleet of per-phone relay sessions used for message
//! redirection, a self-healing watchdog, and the HTTP health surface.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod license;
pub mod payment;
pub mod relay;
pub mod sessions;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod users;
pub mod watchdog;

pub use error::{Error, Result};
