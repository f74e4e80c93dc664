//! `ConfigProvider`: the source of [`super::snapshot::ConfigSnapshot`]s
//! that [`super::lkg::LkgConfigProvider`] wraps.

use async_trait::async_trait;

use crate::config::snapshot::ConfigSnapshot;
use crate::config::validator::ValidationReport;

/// Fatal failure to produce a usable snapshot: no last-known-good snapshot
/// is cached and the candidate failed validation (§4.7, last bullet).
#[derive(Debug, Clone)]
pub struct ConfigUnavailable {
    pub flow_name: String,
    pub report: ValidationReport,
}

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_snapshot(&self, flow_name: &str) -> Result<ConfigSnapshot, ConfigUnavailable>;
}

/// A provider that always returns one fixed snapshot, useful for tests and
/// for embedding a statically-configured deployment.
pub struct StaticConfigProvider(pub ConfigSnapshot);

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn get_snapshot(&self, _flow_name: &str) -> Result<ConfigSnapshot, ConfigUnavailable> {
        Ok(self.0.clone())
    }
}
