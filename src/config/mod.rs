//! Configuration model (§3, §4.7): snapshots, providers, last-known-good
//! fallback, and structural/semantic validation.

pub mod lkg;
pub mod provider;
pub mod snapshot;
pub mod validator;

pub use lkg::{LkgConfigProvider, SnapshotValidator};
pub use provider::{ConfigProvider, ConfigUnavailable, StaticConfigProvider};
pub use snapshot::{ConfigSnapshot, LkgEvidence, SnapshotMeta, SnapshotSource};
pub use validator::{Severity, ValidationFinding, ValidationReport};
