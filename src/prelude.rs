//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use wifi_sentinel::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, WsnError};
pub use crate::core::settings::{FileSettingsSource, Settings, SettingsSource, StaticSettings};

// Classification
pub use crate::classifier::features::{FeatureVector, extract_observation};
pub use crate::classifier::{ClassifierInput, RiskClassifier, build_classifier};

// Pipeline
pub use crate::pipeline::dedup::{ObservationDeduplicator, deduplicate};
pub use crate::pipeline::ingest::{BatchSummary, ProcessedBatch, process_batch};
pub use crate::pipeline::records::{GeoPoint, NetworkObservation, NetworkRecord, RiskLabel};

// Platform
pub use crate::platform::location::{FixedLocation, LocationProvider, NoLocation};
pub use crate::platform::pal::{ReplayScanSource, ScanSource, SourceSpec, open_scan_source};

// Store
pub use crate::store::network_store::{AppendReport, NetworkStore, StoreQuery};

// Daemon
pub use crate::daemon::alerts::{AlertPolicy, GroupedAlert, NotificationSink, RecordingSink};
pub use crate::daemon::job::{JobContext, JobOutcome, ScheduledScanJob};
pub use crate::daemon::scheduler::{CancelToken, JobScheduler};
pub use crate::daemon::session::{LiveSnapshot, ScanSession, SessionContext, SessionHandle};
