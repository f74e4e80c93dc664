//! Last-known-good config fallback (§4.7).
//!
//! Wraps any [`ConfigProvider`]. On each `get_snapshot`: if the candidate's
//! `configVersion` matches the cached good version, serves the cached
//! snapshot without re-validating; otherwise validates the candidate,
//! adopting it as the new last-good on success or serving the previous
//! last-good (stamped with `LkgEvidence`) on failure. With no last-good
//! cached yet, an invalid first candidate is a fatal [`ConfigUnavailable`].
//! Grounded on the teacher's `ReducerRegistry::try_update`, which keeps the
//! last-good reducer set installed and logs+rejects a bad update rather
//! than letting it corrupt running state.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::provider::{ConfigProvider, ConfigUnavailable};
use crate::config::snapshot::{ConfigSnapshot, LkgEvidence, SnapshotMeta, SnapshotSource};
use crate::config::validator::ValidationReport;

/// A function that validates a candidate snapshot's `patch_json`, returning
/// a report whose `is_valid()` gates adoption.
pub type SnapshotValidator = Arc<dyn Fn(&ConfigSnapshot) -> ValidationReport + Send + Sync>;

struct State {
    last_good: Option<ConfigSnapshot>,
}

/// Wraps `inner` with last-known-good fallback behavior. Emits
/// `rorchestrator.config.lkg.fallbacks` (via a `tracing::warn!` event the
/// metrics layer subscribes to) whenever a candidate is rejected and the
/// last-good snapshot is served in its place.
pub struct LkgConfigProvider<P: ConfigProvider> {
    inner: P,
    validate: SnapshotValidator,
    state: Mutex<State>,
}

impl<P: ConfigProvider> LkgConfigProvider<P> {
    pub fn new(inner: P, validate: SnapshotValidator) -> Self {
        Self {
            inner,
            validate,
            state: Mutex::new(State { last_good: None }),
        }
    }
}

#[async_trait]
impl<P: ConfigProvider> ConfigProvider for LkgConfigProvider<P> {
    async fn get_snapshot(&self, flow_name: &str) -> Result<ConfigSnapshot, ConfigUnavailable> {
        let candidate = self.inner.get_snapshot(flow_name).await?;

        if let Some(good) = self.state.lock().last_good.clone() {
            if good.config_version == candidate.config_version {
                return Ok(good);
            }
        }

        let report = (self.validate)(&candidate);

        if report.is_valid() {
            let mut state = self.state.lock();
            state.last_good = Some(candidate.clone());
            return Ok(candidate);
        }

        let mut state = self.state.lock();
        match state.last_good.clone() {
            Some(good) => {
                warn!(
                    flow = flow_name,
                    candidate_config_version = candidate.config_version,
                    last_good_config_version = good.config_version,
                    finding_count = report.findings.len(),
                    "rorchestrator.config.lkg.fallbacks"
                );
                Ok(ConfigSnapshot {
                    config_version: good.config_version,
                    patch_json: good.patch_json,
                    meta: SnapshotMeta {
                        source: SnapshotSource::Lkg,
                        timestamp_utc: good.meta.timestamp_utc,
                        lkg_evidence: Some(LkgEvidence {
                            fallback: true,
                            last_good_config_version: good.config_version,
                            candidate_config_version: candidate.config_version,
                        }),
                    },
                })
            }
            None => {
                warn!(
                    flow = flow_name,
                    candidate_config_version = candidate.config_version,
                    finding_count = report.findings.len(),
                    "no last-good snapshot cached and the first observed snapshot failed validation"
                );
                Err(ConfigUnavailable {
                    flow_name: flow_name.to_string(),
                    report,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FlakyProvider {
        counter: AtomicU64,
    }

    #[async_trait]
    impl ConfigProvider for FlakyProvider {
        async fn get_snapshot(&self, _flow_name: &str) -> Result<ConfigSnapshot, ConfigUnavailable> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(ConfigSnapshot {
                config_version: n,
                patch_json: if n == 0 { "{}".to_string() } else { "not json".to_string() },
                meta: SnapshotMeta {
                    source: SnapshotSource::Static,
                    timestamp_utc: Utc::now(),
                    lkg_evidence: None,
                },
            })
        }
    }

    struct AlwaysInvalidProvider;

    #[async_trait]
    impl ConfigProvider for AlwaysInvalidProvider {
        async fn get_snapshot(&self, _flow_name: &str) -> Result<ConfigSnapshot, ConfigUnavailable> {
            Ok(ConfigSnapshot {
                config_version: 0,
                patch_json: "not json".to_string(),
                meta: SnapshotMeta {
                    source: SnapshotSource::Static,
                    timestamp_utc: Utc::now(),
                    lkg_evidence: None,
                },
            })
        }
    }

    fn validate_is_json(snap: &ConfigSnapshot) -> ValidationReport {
        let mut report = ValidationReport::default();
        if serde_json::from_str::<serde_json::Value>(&snap.patch_json).is_err() {
            report.findings.push(crate::config::validator::ValidationFinding {
                severity: crate::config::validator::Severity::Error,
                code: "CFG_PARSE_ERROR",
                path: "$".to_string(),
                message: "not json".to_string(),
            });
        }
        report
    }

    #[tokio::test]
    async fn falls_back_to_last_good_on_invalid_candidate() {
        let provider = LkgConfigProvider::new(FlakyProvider { counter: AtomicU64::new(0) }, Arc::new(validate_is_json));
        let first = provider.get_snapshot("f").await.unwrap();
        assert_eq!(first.config_version, 0);

        let second = provider.get_snapshot("f").await.unwrap();
        assert_eq!(second.config_version, 0);
        assert_eq!(second.meta.source, SnapshotSource::Lkg);
        assert!(second.meta.lkg_evidence.as_ref().unwrap().fallback);
    }

    #[tokio::test]
    async fn same_config_version_as_last_good_skips_revalidation() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = calls.clone();
        let validate: SnapshotValidator = Arc::new(move |snap| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            validate_is_json(snap)
        });

        let snap = ConfigSnapshot {
            config_version: 7,
            patch_json: "{}".to_string(),
            meta: SnapshotMeta {
                source: SnapshotSource::Static,
                timestamp_utc: Utc::now(),
                lkg_evidence: None,
            },
        };
        let provider = LkgConfigProvider::new(crate::config::provider::StaticConfigProvider(snap), validate);

        provider.get_snapshot("f").await.unwrap();
        provider.get_snapshot("f").await.unwrap();
        provider.get_snapshot("f").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_last_good_and_invalid_first_snapshot_is_fatal() {
        let provider = LkgConfigProvider::new(AlwaysInvalidProvider, Arc::new(validate_is_json));
        let err = provider.get_snapshot("f").await.unwrap_err();
        assert_eq!(err.flow_name, "f");
        assert!(!err.report.is_valid());
    }
}
