pub mod api;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod controller;
pub mod correlation;
pub mod echo;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod prompt;
pub mod protocol;
pub mod routing;
pub mod runner;
pub mod sessions;
pub mod tasks;
pub mod trust;
pub mod types;
