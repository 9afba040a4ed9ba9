//! Test registry
//!
//! The fixed, ordered catalog of checks run against one gateway. Order is
//! part of the contract: evidence is delivered, reported and summarised in
//! catalog order, and runtime checks run before configuration checks so
//! traffic is sent while the control plane is still in the state the run
//! started with.

use crate::checks::{
    ConsumerCoverageCheck, IdentityExpectation, IdentityInjectionCheck, KeyRejectionCheck,
    PluginEnabledCheck, PresentedKey, ScopeRequirement, TestCase, TestIdentity, TierLimitCheck,
};
use crate::config::{Credential, GatewayCredentialSet};

/// Route that carries the rate-limit and key-auth plugins
pub const PROTECTED_PATH: &str = "/api/hello";

/// Route that only checks the key.
///
/// Consumer-scoped limits apply here too, so the key used against it must
/// have budget left after the tier bursts.
pub const HEALTH_PATH: &str = "/api/health";

/// Route that echoes the forwarded consumer
pub const WHOAMI_PATH: &str = "/api/whoami";

/// Key no consumer owns
pub const INVALID_API_KEY: &str = "invalid-key-12345";

/// Free tier requests per minute
pub const FREE_TIER_LIMIT: u32 = 5;

/// Pro tier requests per minute
pub const PRO_TIER_LIMIT: u32 = 60;

const FREE_TIER_BURST: u32 = 8;
const PRO_TIER_BURST: u32 = 10;

const RATE_LIMIT_CONTROLS: &[&str] = &["CC6.1", "CC6.3", "CC7.2"];
const KEY_REJECTION_CONTROLS: &[&str] = &["CC6.1", "CC6.6"];

/// Build the catalog for one gateway.
///
/// Pure: the same credential set always yields the same ordered list.
pub fn catalog(creds: &GatewayCredentialSet) -> Vec<TestCase> {
    vec![
        TestCase::TrafficTierLimit(TierLimitCheck::new(
            TestIdentity::new(
                "RT-001",
                format!("Rate limiting enforces free tier ({FREE_TIER_LIMIT} req/min)"),
                RATE_LIMIT_CONTROLS,
            ),
            "free",
            creds.free_trial_key.clone(),
            PROTECTED_PATH,
            FREE_TIER_BURST,
            FREE_TIER_LIMIT,
        )),
        TestCase::TrafficTierLimit(TierLimitCheck::new(
            TestIdentity::new(
                "RT-002",
                format!("Rate limiting enforces pro tier ({PRO_TIER_LIMIT} req/min)"),
                RATE_LIMIT_CONTROLS,
            ),
            "pro",
            creds.pro_key.clone(),
            PROTECTED_PATH,
            PRO_TIER_BURST,
            PRO_TIER_LIMIT,
        )),
        TestCase::KeyRejection(KeyRejectionCheck::new(
            TestIdentity::new("RT-003", "Invalid API key rejected (401)", KEY_REJECTION_CONTROLS),
            PresentedKey::Invalid(Credential::new(INVALID_API_KEY)),
            PROTECTED_PATH,
        )),
        TestCase::KeyRejection(KeyRejectionCheck::new(
            TestIdentity::new("RT-004", "Missing API key rejected (401)", KEY_REJECTION_CONTROLS),
            PresentedKey::Missing,
            PROTECTED_PATH,
        )),
        TestCase::IdentityInjection(IdentityInjectionCheck::new(
            TestIdentity::new("RT-005", "Valid API key accepted (200)", &["CC6.1"]),
            creds.pro_key.clone(),
            HEALTH_PATH,
            IdentityExpectation::Accepted,
        )),
        TestCase::IdentityInjection(IdentityInjectionCheck::new(
            TestIdentity::new("RT-006", "Consumer identity injected correctly", &["CC6.1", "CC6.3"]),
            creds.pro_key.clone(),
            WHOAMI_PATH,
            IdentityExpectation::CustomId(creds.pro_custom_id.clone()),
        )),
        TestCase::PluginEnabled(PluginEnabledCheck::new(
            TestIdentity::new("CF-001", "Key authentication plugin enabled", &["CC6.1", "CC8.1"]),
            "key-auth",
            ScopeRequirement::Any,
        )),
        TestCase::PluginEnabled(PluginEnabledCheck::new(
            TestIdentity::new(
                "CF-002",
                "Rate limiting plugin enabled per consumer",
                &["CC6.1", "CC6.3", "CC8.1"],
            ),
            "rate-limiting",
            ScopeRequirement::Consumer,
        )),
        TestCase::ConsumerCoverage(ConsumerCoverageCheck::new(
            TestIdentity::new(
                "CF-003",
                "All consumers have rate limits configured",
                &["CC6.2", "CC6.3"],
            ),
            "rate-limiting",
        )),
    ]
}
