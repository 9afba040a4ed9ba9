//! Runtime checks: live traffic against the data plane

use std::time::Instant;

use serde_json::json;
use tracing::debug;

use super::{details, ProbeContext, TestIdentity, TestOutcome};
use crate::config::Credential;
use crate::error::ProbeResult;
use crate::evidence::ArtifactCollector;

const STATUS_OK: u16 = 200;
const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Sends a burst with one tier's key and checks the split between accepted
/// and rate-limited responses.
///
/// With `requests` sent against a `limit`-per-window tier, exactly
/// `min(requests, limit)` must return 200 and the rest 429.
#[derive(Debug, Clone)]
pub struct TierLimitCheck {
    pub(crate) identity: TestIdentity,
    /// Tier label, e.g. "free"
    pub tier: String,
    /// Key belonging to a consumer of this tier
    pub api_key: Credential,
    /// Data-plane path to request
    pub path: String,
    /// Burst size
    pub requests: u32,
    /// Configured requests per window for the tier
    pub limit: u32,
}

impl TierLimitCheck {
    /// Create a tier-limit check
    pub fn new(
        identity: TestIdentity,
        tier: impl Into<String>,
        api_key: Credential,
        path: impl Into<String>,
        requests: u32,
        limit: u32,
    ) -> Self {
        Self {
            identity,
            tier: tier.into(),
            api_key,
            path: path.into(),
            requests,
            limit,
        }
    }

    pub(crate) async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        ctx.window.wait_for_fresh_window().await;

        let mut collector = ArtifactCollector::new();
        let mut results = Vec::with_capacity(self.requests as usize);
        let (mut success, mut rate_limited, mut other) = (0u32, 0u32, 0u32);
        let mut first_rejection = None;

        let started = Instant::now();
        for n in 1..=self.requests {
            let offset_ms = started.elapsed().as_millis() as u64;
            let response = ctx.data_plane.get(&self.path, Some(&self.api_key)).await?;
            match response.status {
                STATUS_OK => success += 1,
                STATUS_TOO_MANY_REQUESTS => rate_limited += 1,
                _ => other += 1,
            }
            debug!(
                test_id = %self.identity.id(),
                request = n,
                status = response.status,
                offset_ms,
                "Traffic probe response"
            );
            results.push(json!({
                "request": n,
                "status": response.status,
                "offset_ms": offset_ms,
            }));
            if response.status == STATUS_TOO_MANY_REQUESTS && first_rejection.is_none() {
                first_rejection = Some(response);
            }
        }
        let elapsed = started.elapsed();

        let expected_success = self.requests.min(self.limit);
        let expected_rate_limited = self.requests - expected_success;

        collector.test_results(
            format!("Status codes for {} requests with the {} tier key", self.requests, self.tier),
            &results,
        );
        if let Some(ref response) = first_rejection {
            collector.http_response("First rate-limited response", response);
        }

        let details = details(json!({
            "tier": self.tier,
            "api_key": self.api_key.fingerprint(),
            "path": self.path,
            "limit_per_window": self.limit,
            "window_seconds": ctx.window.period.as_secs(),
            "requests_sent": self.requests,
            "expected_success": expected_success,
            "expected_rate_limited": expected_rate_limited,
            "success_count": success,
            "rate_limited_count": rate_limited,
            "other_count": other,
            "results": results,
            "window_elapsed_ms": elapsed.as_millis() as u64,
        }));

        if elapsed > ctx.window.period {
            return Ok(TestOutcome::error_with_details(
                format!(
                    "burst of {} requests took {} ms, longer than the {} s rate-limit window",
                    self.requests,
                    elapsed.as_millis(),
                    ctx.window.period.as_secs()
                ),
                details,
                collector.into_artifacts(),
            ));
        }

        let passed = other == 0 && success == expected_success && rate_limited == expected_rate_limited;
        Ok(TestOutcome::assertion(passed, details, collector.into_artifacts()))
    }
}

/// Key presented by a rejection check
#[derive(Debug, Clone)]
pub enum PresentedKey {
    /// A key no consumer owns
    Invalid(Credential),
    /// No key header at all
    Missing,
}

impl PresentedKey {
    fn label(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::Missing => "missing",
        }
    }

    fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Invalid(key) => Some(key),
            Self::Missing => None,
        }
    }
}

/// A request with an invalid or missing key must be rejected with 401 and
/// must not be attributed to any consumer.
#[derive(Debug, Clone)]
pub struct KeyRejectionCheck {
    pub(crate) identity: TestIdentity,
    /// What key to send
    pub presented: PresentedKey,
    /// Data-plane path to request
    pub path: String,
}

impl KeyRejectionCheck {
    /// Create a key-rejection check
    pub fn new(identity: TestIdentity, presented: PresentedKey, path: impl Into<String>) -> Self {
        Self {
            identity,
            presented,
            path: path.into(),
        }
    }

    pub(crate) async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        let response = ctx
            .data_plane
            .get(&self.path, self.presented.credential())
            .await?;
        let leaked = response.consumer_identity();

        let mut collector = ArtifactCollector::new();
        collector.http_response(
            format!("Response to a request with a {} API key", self.presented.label()),
            &response,
        );

        let passed = response.status == STATUS_UNAUTHORIZED && leaked.is_none();
        let details = details(json!({
            "path": self.path,
            "presented_key": self.presented.label(),
            "api_key": self.presented.credential().map(Credential::fingerprint),
            "expected_status": STATUS_UNAUTHORIZED,
            "status_code": response.status,
            "identity_leaked": leaked.is_some(),
            "consumer_identity": leaked,
        }));
        Ok(TestOutcome::assertion(passed, details, collector.into_artifacts()))
    }
}

/// What an accepted request must show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityExpectation {
    /// 200 is enough
    Accepted,
    /// 200 and the forwarded consumer carries this custom id
    CustomId(String),
}

/// A request with a valid key must be accepted, and optionally attributed
/// to the expected consumer.
#[derive(Debug, Clone)]
pub struct IdentityInjectionCheck {
    pub(crate) identity: TestIdentity,
    /// Valid consumer key
    pub api_key: Credential,
    /// Data-plane path to request
    pub path: String,
    /// What the response must show
    pub expectation: IdentityExpectation,
}

impl IdentityInjectionCheck {
    /// Create an identity check
    pub fn new(
        identity: TestIdentity,
        api_key: Credential,
        path: impl Into<String>,
        expectation: IdentityExpectation,
    ) -> Self {
        Self {
            identity,
            api_key,
            path: path.into(),
            expectation,
        }
    }

    pub(crate) async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        let response = ctx.data_plane.get(&self.path, Some(&self.api_key)).await?;
        let observed = response.consumer_identity();

        let mut collector = ArtifactCollector::new();
        collector.http_response("Response to a request with a valid API key", &response);

        let accepted = response.status == STATUS_OK;
        let (passed, expected_custom_id) = match self.expectation {
            IdentityExpectation::Accepted => (accepted, None),
            IdentityExpectation::CustomId(ref expected) => {
                let matches = observed
                    .as_ref()
                    .and_then(|id| id.custom_id.as_deref())
                    .is_some_and(|custom_id| custom_id == expected);
                (accepted && matches, Some(expected.as_str()))
            }
        };

        let details = details(json!({
            "path": self.path,
            "api_key": self.api_key.fingerprint(),
            "expected_status": STATUS_OK,
            "status_code": response.status,
            "expected_custom_id": expected_custom_id,
            "consumer_identity": observed,
        }));
        Ok(TestOutcome::assertion(passed, details, collector.into_artifacts()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::checks::fakes::{context, response, ScriptedDataPlane, StaticControlPlane};
    use crate::checks::{TestCase, TestStatus};
    use crate::error::ProbeError;

    fn free_tier(requests: u32, limit: u32) -> TestCase {
        TestCase::TrafficTierLimit(TierLimitCheck::new(
            TestIdentity::new("RT-001", "Rate limiting enforces free tier (5 req/min)", &["CC6.1"]),
            "free",
            Credential::new("free-trial-key"),
            "/api/hello",
            requests,
            limit,
        ))
    }

    #[tokio::test]
    async fn test_tier_limit_pass() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[
            200, 200, 200, 200, 200, 429, 429, 429,
        ]));
        let ctx = context(StaticControlPlane::default(), plane.clone());

        let outcome = free_tier(8, 5).execute(&ctx).await.unwrap();

        assert_eq!(outcome.status, TestStatus::Pass);
        assert_eq!(outcome.details["success_count"], 5);
        assert_eq!(outcome.details["rate_limited_count"], 3);
        assert_eq!(outcome.details["other_count"], 0);
        assert_eq!(outcome.details["results"].as_array().unwrap().len(), 8);
        assert_eq!(plane.request_count(), 8);

        let requests = plane.requests.lock().unwrap();
        assert!(requests
            .iter()
            .all(|(path, key)| path == "/api/hello" && key.as_deref() == Some("free-trial-key")));
    }

    #[tokio::test]
    async fn test_tier_limit_details_never_carry_raw_key() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200; 8]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = free_tier(8, 5).execute(&ctx).await.unwrap();

        let serialized = serde_json::to_string(&outcome.details).unwrap();
        assert!(!serialized.contains("free-trial-key"));
        assert!(outcome.details["api_key"].as_str().unwrap().starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_tier_limit_fails_when_limit_not_enforced() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200; 8]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = free_tier(8, 5).execute(&ctx).await.unwrap();

        assert_eq!(outcome.status, TestStatus::Fail);
        assert_eq!(outcome.details["success_count"], 8);
        assert_eq!(outcome.details["rate_limited_count"], 0);
    }

    #[tokio::test]
    async fn test_tier_limit_unexpected_status_fails() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[
            200, 200, 200, 200, 200, 429, 429, 503,
        ]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = free_tier(8, 5).execute(&ctx).await.unwrap();

        assert_eq!(outcome.status, TestStatus::Fail);
        assert_eq!(outcome.details["other_count"], 1);
    }

    #[tokio::test]
    async fn test_tier_limit_under_limit_expects_no_rejections() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200; 10]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = free_tier(10, 60).execute(&ctx).await.unwrap();

        assert_eq!(outcome.status, TestStatus::Pass);
        assert_eq!(outcome.details["expected_rate_limited"], 0);
    }

    #[tokio::test]
    async fn test_tier_limit_transport_failure_is_error() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200, 200]));
        plane.push_transport_error("connection reset by peer");
        let ctx = context(StaticControlPlane::default(), plane);

        let err = free_tier(8, 5).execute(&ctx).await.unwrap_err();
        assert!(matches!(err, ProbeError::Transport { .. }));
    }

    fn rejection(presented: PresentedKey) -> TestCase {
        TestCase::KeyRejection(KeyRejectionCheck::new(
            TestIdentity::new("RT-004", "Missing API key rejected (401)", &["CC6.1", "CC6.6"]),
            presented,
            "/api/hello",
        ))
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let plane = Arc::new(ScriptedDataPlane::default());
        plane.push(response(
            401,
            &[("content-type", "application/json")],
            Some(json!({"message": "No API key found in request"})),
        ));
        let ctx = context(StaticControlPlane::default(), plane.clone());

        let outcome = rejection(PresentedKey::Missing).execute(&ctx).await.unwrap();

        assert_eq!(outcome.status, TestStatus::Pass);
        assert_eq!(outcome.details["status_code"], 401);
        assert_eq!(outcome.details["identity_leaked"], false);
        assert_eq!(plane.requests.lock().unwrap()[0].1, None);
    }

    #[tokio::test]
    async fn test_rejection_with_identity_leak_fails() {
        let plane = Arc::new(ScriptedDataPlane::default());
        plane.push(response(401, &[("x-consumer-username", "free-user")], None));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = rejection(PresentedKey::Invalid(Credential::new("invalid-key-12345")))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Fail);
        assert_eq!(outcome.details["identity_leaked"], true);
        assert_eq!(outcome.details["presented_key"], "invalid");
    }

    #[tokio::test]
    async fn test_invalid_key_accepted_fails() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = rejection(PresentedKey::Invalid(Credential::new("invalid-key-12345")))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Fail);
        assert_eq!(outcome.details["status_code"], 200);
    }

    fn identity_check(expectation: IdentityExpectation) -> TestCase {
        TestCase::IdentityInjection(IdentityInjectionCheck::new(
            TestIdentity::new("RT-006", "Consumer identity injected correctly", &["CC6.1"]),
            Credential::new("pro-key"),
            "/api/whoami",
            expectation,
        ))
    }

    #[tokio::test]
    async fn test_identity_injected() {
        let plane = Arc::new(ScriptedDataPlane::default());
        plane.push(response(
            200,
            &[],
            Some(json!({"consumer": {"id": "c2", "username": "pro-user", "custom_id": "tier_pro"}})),
        ));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = identity_check(IdentityExpectation::CustomId("tier_pro".to_string()))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Pass);
        assert_eq!(outcome.details["consumer_identity"]["username"], "pro-user");
    }

    #[tokio::test]
    async fn test_identity_split_between_header_and_body_passes() {
        let plane = Arc::new(ScriptedDataPlane::default());
        plane.push(response(
            200,
            &[("x-consumer-username", "pro-user")],
            Some(json!({"consumer": {"username": "pro-user", "custom_id": "tier_pro"}})),
        ));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = identity_check(IdentityExpectation::CustomId("tier_pro".to_string()))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Pass, "{:?}", outcome.details);
        assert_eq!(outcome.details["consumer_identity"]["custom_id"], "tier_pro");
    }

    #[tokio::test]
    async fn test_identity_mismatch_fails() {
        let plane = Arc::new(ScriptedDataPlane::default());
        plane.push(response(200, &[("x-consumer-custom-id", "tier_free")], None));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = identity_check(IdentityExpectation::CustomId("tier_pro".to_string()))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Fail);
    }

    #[tokio::test]
    async fn test_valid_key_accepted() {
        let plane = Arc::new(ScriptedDataPlane::with_statuses(&[200]));
        let ctx = context(StaticControlPlane::default(), plane);

        let outcome = identity_check(IdentityExpectation::Accepted)
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome.status, TestStatus::Pass);
        assert_eq!(outcome.artifacts.len(), 1);
    }
}
