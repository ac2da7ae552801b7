//! Start-up resolution of provider endpoints from the discovery document.
//!
//! B2C publishes one discovery document per policy at
//! `{tenant}/{policy}/v2.0/.well-known/openid-configuration`. Its `issuer`
//! names the tenant GUID rather than the document's own base, so the document
//! is fetched directly instead of going through issuer-checked discovery.

use crate::error::ConfigurationError;
use crate::policy::{Policy, ProviderEndpoints};
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    #[serde(default)]
    end_session_endpoint: Option<String>,
    jwks_uri: String,
}

/// URL of the policy's discovery document.
#[must_use]
pub fn discovery_url(policy: &Policy) -> String {
    format!(
        "{}/{}/v2.0/.well-known/openid-configuration",
        policy.tenant().trim_end_matches('/'),
        policy.policy_id()
    )
}

/// Fetches the discovery document for `policy` and returns its endpoints.
///
/// A provider without an `end_session_endpoint` keeps the derived one.
#[instrument(skip(http, policy), fields(policy = %policy.name()))]
pub async fn discover(
    http: &reqwest::Client,
    policy: &Policy,
) -> Result<ProviderEndpoints, Report<ConfigurationError>> {
    policy.ensure_complete()?;

    let url = discovery_url(policy);
    let failed = |reason: String| ConfigurationError::Discovery {
        policy: policy.name(),
        reason,
    };

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| failed(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(failed(format!("GET {url} returned {}", response.status())).into());
    }

    let doc: DiscoveryDocument = response
        .json()
        .await
        .map_err(|e| failed(format!("unparsable discovery document: {e}")))?;

    if doc.jwks_uri.trim().is_empty() {
        return Err(failed("discovery document has an empty jwks_uri".to_string()).into());
    }

    let end_session_endpoint = doc
        .end_session_endpoint
        .unwrap_or_else(|| policy.endpoints().end_session_endpoint().to_string());

    info!(
        issuer = %doc.issuer,
        authorization_endpoint = %doc.authorization_endpoint,
        jwks_uri = %doc.jwks_uri,
        "resolved provider endpoints"
    );

    Ok(ProviderEndpoints::new(
        doc.issuer,
        doc.authorization_endpoint,
        end_session_endpoint,
        doc.jwks_uri,
    ))
}
