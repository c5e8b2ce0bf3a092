//! Core types: errors, configuration, user settings, file helpers.

pub mod config;
pub mod errors;
pub mod fsio;
pub mod settings;
