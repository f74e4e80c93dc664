//! `ConfigSnapshot` (§3): what a [`super::provider::ConfigProvider`] hands
//! back. Two snapshots with the same `config_version` are treated as
//! identical, which is what lets [`crate::host::FlowHost`] cache plan
//! compilation by `(flowName, configVersion)` instead of by snapshot
//! identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Static,
    Lkg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LkgEvidence {
    pub fallback: bool,
    pub last_good_config_version: u64,
    pub candidate_config_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub source: SnapshotSource,
    pub timestamp_utc: DateTime<Utc>,
    pub lkg_evidence: Option<LkgEvidence>,
}

#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config_version: u64,
    pub patch_json: String,
    pub meta: SnapshotMeta,
}

impl PartialEq for ConfigSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.config_version == other.config_version
    }
}

impl Eq for ConfigSnapshot {}
