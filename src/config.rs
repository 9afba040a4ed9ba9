//! Run configuration
//!
//! Every input the run needs is read once, at process start, into a typed
//! and validated [`RunConfig`]. A missing required variable is a
//! [`ConfigError`] and no check executes.
//!
//! # Example
//!
//! ```ignore
//! use gatecheck::RunConfig;
//!
//! let config = RunConfig::from_env()?;
//! if config.delivery_mode().is_dry_run() {
//!     tracing::info!("evidence will be written locally");
//! }
//! ```

use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::ConfigError;
use crate::parse::{parse_bool, parse_duration};

/// Default evidence service base URL
pub const DEFAULT_EVIDENCE_API_BASE: &str = "https://public-api.drata.com";

/// Default control-plane name
pub const DEFAULT_CONTROL_PLANE_NAME: &str = "kong-hybrid-rate-limit-demo";

/// Default per-call timeout for probes and evidence delivery
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A secret value that can be cloned into the places that need it but
/// never prints itself.
///
/// Evidence refers to credentials only by [`Credential::fingerprint`].
pub struct Credential(SecretString);

impl Credential {
    /// Wrap a raw secret
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Borrow the raw secret for placing it on the wire
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Short, stable, non-reversible identifier for logs and evidence
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose().as_bytes());
        let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        format!("sha256:{hex}")
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Control-plane region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    /// United States
    #[default]
    Us,
    /// European Union
    Eu,
    /// Australia
    Au,
}

impl Region {
    /// Parse a region code
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "eu" => Ok(Self::Eu),
            "au" => Ok(Self::Au),
            other => Err(ConfigError::UnknownRegion {
                region: other.to_string(),
            }),
        }
    }

    /// Region code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::Au => "au",
        }
    }

    /// Control-plane API base URL for this region
    pub fn api_base(&self) -> &'static str {
        match self {
            Self::Us => "https://us.api.konghq.com",
            Self::Eu => "https://eu.api.konghq.com",
            Self::Au => "https://au.api.konghq.com",
        }
    }
}

/// Gateway identity and credentials for the run.
///
/// Supplied externally and immutable for the whole run.
#[derive(Debug, Clone)]
pub struct GatewayCredentialSet {
    /// Control-plane bearer token
    pub control_plane_token: Credential,
    /// Control-plane region
    pub region: Region,
    /// Control-plane API base (region default unless overridden)
    pub control_plane_api_base: Url,
    /// Name of the control plane to audit
    pub control_plane_name: String,
    /// Data-plane base URL
    pub dataplane_url: Url,
    /// API key of the free trial tier consumer
    pub free_trial_key: Credential,
    /// API key of the pro tier consumer
    pub pro_key: Credential,
    /// `custom_id` the gateway should resolve the pro key to
    pub pro_custom_id: String,
}

/// Evidence service settings
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    /// Evidence service API key; `None` forces dry-run delivery
    pub api_key: Option<Credential>,
    /// Evidence service base URL
    pub api_base: Url,
    /// HMAC key for signing the local run report
    pub signing_key: Option<Credential>,
}

/// Why a run is not delivering to the evidence service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunReason {
    /// Operator asked for it
    Requested,
    /// No evidence service credential configured
    MissingCredential,
}

/// Evidence delivery mode, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Submit to the evidence service
    Live,
    /// Write records to local output only
    DryRun(DryRunReason),
}

impl DeliveryMode {
    /// Whether no network delivery will happen
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }
}

/// Complete, validated configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Gateway under test
    pub gateway: GatewayCredentialSet,
    /// Evidence delivery target
    pub evidence: EvidenceConfig,
    /// Operator requested dry-run
    pub dry_run_requested: bool,
    /// Verbose output
    pub verbose: bool,
    /// Connect/read timeout per outbound call
    pub probe_timeout: Duration,
    /// Wait for a fresh rate-limit window before each traffic check
    pub wait_for_window: bool,
}

impl RunConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `KONNECT_TOKEN`: control-plane bearer token
    /// - `DATAPLANE_URL`: data-plane base URL
    ///
    /// Optional:
    /// - `DRATA_API_KEY`: evidence service key (absent = dry-run)
    /// - `KONNECT_REGION`: "us", "eu", "au" (default: "us")
    /// - `KONNECT_API_BASE`: overrides the region's API base URL
    /// - `CONTROL_PLANE_NAME` (default: "kong-hybrid-rate-limit-demo")
    /// - `FREE_TRIAL_KEY` (default: "free-trial-key")
    /// - `PRO_KEY` (default: "pro-key")
    /// - `PRO_CUSTOM_ID` (default: "tier_pro")
    /// - `DRATA_API_BASE` (default: "https://public-api.drata.com")
    /// - `DRY_RUN`, `VERBOSE`, `WAIT_FOR_WINDOW`: booleans
    /// - `PROBE_TIMEOUT`: e.g. "10s" (default: "10s")
    /// - `EVIDENCE_SIGNING_KEY`: HMAC key for the run report
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let control_plane_token = get("KONNECT_TOKEN").ok_or(ConfigError::Missing {
            name: "KONNECT_TOKEN",
        })?;
        let control_plane_token = header_credential("KONNECT_TOKEN", &control_plane_token)?;

        let dataplane_url = get("DATAPLANE_URL").ok_or(ConfigError::Missing {
            name: "DATAPLANE_URL",
        })?;
        let dataplane_url = parse_url("DATAPLANE_URL", &dataplane_url)?;

        let region = match get("KONNECT_REGION") {
            Some(r) => Region::parse(&r)?,
            None => Region::default(),
        };
        let control_plane_api_base = match get("KONNECT_API_BASE") {
            Some(base) => parse_url("KONNECT_API_BASE", &base)?,
            None => parse_url("KONNECT_REGION", region.api_base())?,
        };

        let gateway = GatewayCredentialSet {
            control_plane_token,
            region,
            control_plane_api_base,
            control_plane_name: get("CONTROL_PLANE_NAME")
                .unwrap_or_else(|| DEFAULT_CONTROL_PLANE_NAME.to_string()),
            dataplane_url,
            free_trial_key: header_credential(
                "FREE_TRIAL_KEY",
                &get("FREE_TRIAL_KEY").unwrap_or_else(|| "free-trial-key".to_string()),
            )?,
            pro_key: header_credential(
                "PRO_KEY",
                &get("PRO_KEY").unwrap_or_else(|| "pro-key".to_string()),
            )?,
            pro_custom_id: get("PRO_CUSTOM_ID").unwrap_or_else(|| "tier_pro".to_string()),
        };

        let evidence = EvidenceConfig {
            api_key: get("DRATA_API_KEY")
                .map(|key| header_credential("DRATA_API_KEY", &key))
                .transpose()?,
            api_base: parse_url(
                "DRATA_API_BASE",
                &get("DRATA_API_BASE").unwrap_or_else(|| DEFAULT_EVIDENCE_API_BASE.to_string()),
            )?,
            signing_key: get("EVIDENCE_SIGNING_KEY").map(Credential::new),
        };

        let flag = |name: &'static str, default: bool| -> Result<bool, ConfigError> {
            match get(name) {
                Some(v) => parse_bool(&v)
                    .ok_or_else(|| ConfigError::invalid(name, format!("not a boolean: {v}"))),
                None => Ok(default),
            }
        };

        let probe_timeout = match get("PROBE_TIMEOUT") {
            Some(v) => parse_duration(&v)
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ConfigError::invalid("PROBE_TIMEOUT", format!("not a duration: {v}")))?,
            None => DEFAULT_PROBE_TIMEOUT,
        };

        Ok(Self {
            gateway,
            evidence,
            dry_run_requested: flag("DRY_RUN", false)?,
            verbose: flag("VERBOSE", false)?,
            probe_timeout,
            wait_for_window: flag("WAIT_FOR_WINDOW", true)?,
        })
    }

    /// Resolve the delivery mode.
    ///
    /// A missing evidence credential downgrades the run to dry-run rather
    /// than failing it.
    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.dry_run_requested {
            DeliveryMode::DryRun(DryRunReason::Requested)
        } else if self.evidence.api_key.is_none() {
            DeliveryMode::DryRun(DryRunReason::MissingCredential)
        } else {
            DeliveryMode::Live
        }
    }
}

/// A credential sent in an HTTP header. Surrounding whitespace (a trailing
/// newline from a secrets file) is dropped; anything else a header cannot
/// carry is a configuration error. The message never includes the value.
fn header_credential(name: &'static str, value: &str) -> Result<Credential, ConfigError> {
    let value = value.trim();
    if HeaderValue::from_str(value).is_err() {
        return Err(ConfigError::invalid(
            name,
            "contains characters not allowed in an HTTP header",
        ));
    }
    Ok(Credential::new(value))
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|e| ConfigError::invalid(name, format!("{e}: {value}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::invalid(
            name,
            format!("unsupported scheme '{other}'"),
        )),
    }
}
