// src/lib.rs

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod energy;
pub mod error;
pub mod scheduler;
pub mod status;

pub use config::BotConfig;
pub use error::Error;
pub use scheduler::{GameLoopScheduler, SchedulerSettings};
pub use status::{LoopPhase, StatusBus, StatusSnapshot};
