#![forbid(unsafe_code)]

//! WiFi Sentinel (wsn): watches nearby wireless networks and raises alerts for
//! insecure ones.
//!
//! The core is one pipeline applied to every scan batch:
//! 1. **Classify**: capability text, signal and SSID become a feature vector
//!    and a risk label (model-backed with a rule-based fallback).
//! 2. **Deduplicate**: one canonical record per SSID within the batch.
//! 3. **Persist**: newly seen `(ssid, bssid)` pairs are appended to the
//!    semicolon-delimited dataset.
//! 4. **Alert**: dangerous networks are grouped into a single notification.
//!
//! The pipeline runs from a live [`daemon::session::ScanSession`] or from the
//! periodic [`daemon::job::ScheduledScanJob`].
//!
//! # Library usage
//!
//! ```rust,no_run
//! use wifi_sentinel::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use wifi_sentinel::core::config::Config;
//! use wifi_sentinel::store::network_store::NetworkStore;
//! ```

pub mod prelude;

pub mod classifier;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod pipeline;
pub mod platform;
pub mod store;
