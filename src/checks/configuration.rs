//! Configuration checks: declarative state read from the control plane

use std::collections::BTreeSet;

use serde_json::json;

use super::{details, ProbeContext, TestIdentity, TestOutcome};
use crate::error::ProbeResult;
use crate::evidence::ArtifactCollector;
use crate::probe::{Plugin, PluginScope};

/// Attachment a plugin instance must have to count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRequirement {
    /// Global, service, route or consumer
    Any,
    /// Scoped to a consumer
    Consumer,
}

impl ScopeRequirement {
    fn admits(&self, plugin: &Plugin) -> bool {
        match self {
            Self::Any => true,
            Self::Consumer => plugin.scope() == PluginScope::Consumer,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Consumer => "consumer",
        }
    }
}

/// At least one enabled instance of a plugin must exist at the required
/// scope.
#[derive(Debug, Clone)]
pub struct PluginEnabledCheck {
    pub(crate) identity: TestIdentity,
    /// Plugin name, e.g. "key-auth"
    pub plugin: String,
    /// Required attachment
    pub scope: ScopeRequirement,
}

impl PluginEnabledCheck {
    /// Create a plugin-enabled check
    pub fn new(identity: TestIdentity, plugin: impl Into<String>, scope: ScopeRequirement) -> Self {
        Self {
            identity,
            plugin: plugin.into(),
            scope,
        }
    }

    pub(crate) async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        let instances = ctx.control_plane.plugins_named(&self.plugin).await?;
        let matching: Vec<&Plugin> = instances
            .iter()
            .filter(|p| p.enabled && self.scope.admits(p))
            .collect();

        let mut collector = ArtifactCollector::new();
        collector.config_snapshot(
            format!("{} plugin instances", self.plugin),
            instances.iter().map(Plugin::snapshot).collect::<Vec<_>>(),
        );

        let mut scoped_consumers: Vec<&str> =
            matching.iter().filter_map(|p| p.consumer_id()).collect();
        scoped_consumers.sort_unstable();
        scoped_consumers.dedup();

        let details = details(json!({
            "plugin": self.plugin,
            "required_scope": self.scope.as_str(),
            "total_instances": instances.len(),
            "enabled_instances": instances.iter().filter(|p| p.enabled).count(),
            "matching_instances": matching.len(),
            "matching_plugin_ids": matching.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            "scoped_consumer_ids": scoped_consumers,
        }));
        Ok(TestOutcome::assertion(
            !matching.is_empty(),
            details,
            collector.into_artifacts(),
        ))
    }
}

/// Every registered consumer must be covered by an enabled, consumer-scoped
/// instance of the rate-limit plugin.
///
/// This is a set difference: consumers minus covered consumers must be
/// empty. With no consumers registered there is nothing to attest and the
/// check fails.
#[derive(Debug, Clone)]
pub struct ConsumerCoverageCheck {
    pub(crate) identity: TestIdentity,
    /// Rate-limit plugin name
    pub plugin: String,
}

impl ConsumerCoverageCheck {
    /// Create a coverage check
    pub fn new(identity: TestIdentity, plugin: impl Into<String>) -> Self {
        Self {
            identity,
            plugin: plugin.into(),
        }
    }

    pub(crate) async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        let consumers = ctx.control_plane.consumers().await?;
        let limits = ctx.control_plane.plugins_named(&self.plugin).await?;

        let covered: BTreeSet<&str> = limits
            .iter()
            .filter(|p| p.enabled)
            .filter_map(Plugin::consumer_id)
            .collect();

        let coverage: Vec<serde_json::Value> = consumers
            .iter()
            .map(|c| {
                let plugin = limits
                    .iter()
                    .find(|p| p.enabled && p.consumer_id() == Some(c.id.as_str()));
                json!({
                    "consumer": c.display_name(),
                    "consumer_id": c.id,
                    "has_limit": plugin.is_some(),
                    "limit": plugin.map(|p| json!({
                        "second": p.config.get("second"),
                        "minute": p.config.get("minute"),
                        "hour": p.config.get("hour"),
                    })),
                })
            })
            .collect();

        let missing: Vec<&str> = consumers
            .iter()
            .filter(|c| !covered.contains(c.id.as_str()))
            .map(|c| c.display_name())
            .collect();

        let mut collector = ArtifactCollector::new();
        collector.config_snapshot("Registered consumers", &consumers);
        collector.config_snapshot(
            format!("{} plugin instances", self.plugin),
            limits.iter().map(Plugin::snapshot).collect::<Vec<_>>(),
        );

        let passed = !consumers.is_empty() && missing.is_empty();
        let mut details = details(json!({
            "plugin": self.plugin,
            "total_consumers": consumers.len(),
            "covered_consumers": consumers.len() - missing.len(),
            "missing_limits": missing,
            "coverage": coverage,
        }));
        if consumers.is_empty() {
            details.insert("reason".to_string(), json!("no consumers registered"));
        }
        Ok(TestOutcome::assertion(passed, details, collector.into_artifacts()))
    }
}
