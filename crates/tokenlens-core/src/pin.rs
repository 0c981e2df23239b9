//! IPFS pin-status probing: a pinning-service status query, falling back to
//! concurrent gateway HEAD checks.

use std::time::Duration;

use futures::future::join_all;

use crate::types::PinStatus;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(3);
const PIN_SERVICE_TIMEOUT: Duration = Duration::from_secs(3);

/// Public gateways probed when no pinning service confirms a pin. The set is
/// explicit constructor configuration, not env-driven.
pub fn default_gateways() -> Vec<String> {
    vec![
        "https://ipfs.io/ipfs".to_string(),
        "https://cloudflare-ipfs.com/ipfs".to_string(),
        "https://dweb.link/ipfs".to_string(),
        "https://nftstorage.link/ipfs".to_string(),
    ]
}

pub struct PinProbe {
    client: reqwest::Client,
    /// Base URL of a pinning-service status endpoint, queried as `<base>/<cid>`.
    /// `None` disables the pinning-service check entirely, going straight to
    /// gateway probing.
    pin_service_base: Option<String>,
    gateways: Vec<String>,
}

impl PinProbe {
    pub fn new(client: reqwest::Client, pin_service_base: Option<String>, gateways: Vec<String>) -> Self {
        Self { client, pin_service_base, gateways }
    }

    pub fn with_defaults(client: reqwest::Client) -> Self {
        Self::new(client, None, default_gateways())
    }

    /// Runs the full pin-status probe for a CID. Callers are responsible for
    /// only invoking this when the storage kind is `ipfs` and a CID was
    /// actually extracted; this function itself never returns `unknown`.
    pub async fn check(&self, cid: &str) -> PinStatus {
        if let Some(base) = &self.pin_service_base {
            if query_pinning_service(&self.client, base, cid).await {
                return PinStatus::Pinned;
            }
        }

        if check_gateways_concurrently(&self.client, &self.gateways, cid).await {
            PinStatus::Available
        } else {
            PinStatus::Unavailable
        }
    }
}

/// Queries a pinning service's status endpoint; a positive answer (2xx with a
/// truthy `pinned` field, or any field naming a non-empty `pins` list) counts
/// as pinned.
async fn query_pinning_service(client: &reqwest::Client, base: &str, cid: &str) -> bool {
    let url = format!("{}/{}", base.trim_end_matches('/'), cid);
    let response = match client.get(&url).timeout(PIN_SERVICE_TIMEOUT).send().await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if !response.status().is_success() {
        return false;
    }
    let body: serde_json::Value = match response.json().await {
        Ok(v) => v,
        Err(_) => return false,
    };
    if body.get("pinned").and_then(|v| v.as_bool()) == Some(true) {
        return true;
    }
    if let Some(pins) = body.get("pins").and_then(|v| v.as_array()) {
        return !pins.is_empty();
    }
    false
}

/// Issues a concurrent `HEAD` against every gateway; any 2xx counts as available.
async fn check_gateways_concurrently(client: &reqwest::Client, gateways: &[String], cid: &str) -> bool {
    let checks = gateways.iter().map(|gateway| {
        let client = client.clone();
        let url = format!("{}/{}", gateway.trim_end_matches('/'), cid);
        async move {
            client
                .head(&url)
                .timeout(GATEWAY_TIMEOUT)
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false)
        }
    });
    join_all(checks).await.into_iter().any(|ok| ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn pinning_service_positive_answer_short_circuits_gateway_checks() {
        let pin_service = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "pinned": true })))
            .mount(&pin_service)
            .await;

        // Gateways deliberately point nowhere; if they were hit, the status
        // would be unavailable instead of pinned.
        let probe = PinProbe::new(
            reqwest::Client::new(),
            Some(pin_service.uri()),
            vec!["http://127.0.0.1:1".to_string()],
        );
        assert_eq!(probe.check("QmCid").await, PinStatus::Pinned);
    }

    #[tokio::test]
    async fn falls_back_to_gateway_head_when_pin_service_is_negative() {
        let pin_service = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "pinned": false })))
            .mount(&pin_service)
            .await;

        let gateway = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&gateway)
            .await;

        let probe = PinProbe::new(reqwest::Client::new(), Some(pin_service.uri()), vec![gateway.uri()]);
        assert_eq!(probe.check("QmCid").await, PinStatus::Available);
    }

    #[tokio::test]
    async fn all_failures_yield_unavailable() {
        let probe = PinProbe::new(
            reqwest::Client::new(),
            None,
            vec!["http://127.0.0.1:1".to_string(), "http://127.0.0.1:2".to_string()],
        );
        assert_eq!(probe.check("QmCid").await, PinStatus::Unavailable);
    }
}
