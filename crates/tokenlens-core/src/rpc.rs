//! Token-URI resolver: discovers a token's metadata pointer by probing a contract
//! as ERC-721 then ERC-1155, fanning out across a ranked endpoint pool.

use std::time::{Duration, Instant};

use alloy_primitives::U256;

use crate::cache::LruTtlCache;
use crate::chain::{ChainId, EndpointPool};
use crate::error::{classify_attempt, terminal_error, AttemptClass, EndpointAttempt, ResolveError};
use crate::types::{ContractAddress, TokenId, TokenKey};
use crate::uri::substitute_token_id;

/// `tokenURI(uint256)` — ERC-721 Metadata selector.
const SELECTOR_TOKEN_URI: [u8; 4] = [0xc8, 0x7b, 0x56, 0xdd];
/// `uri(uint256)` — ERC-1155 Metadata URI selector.
const SELECTOR_URI: [u8; 4] = [0x0e, 0x89, 0x34, 0x1c];

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TTL for resolved token URIs.
pub const DEFAULT_URI_CACHE_TTL: Duration = Duration::from_secs(300);

/// ABI-encodes a single-`uint256`-argument call: 4-byte selector + 32-byte word.
fn encode_call(selector: [u8; 4], token_id: &TokenId) -> Result<Vec<u8>, ResolveError> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&token_id.to_u256_be_bytes()?);
    Ok(data)
}

/// Decodes a single ABI-encoded dynamic `string` return value: a 32-byte offset
/// word, then at that offset a 32-byte length word, then the UTF-8 payload.
fn decode_abi_string(data: &[u8]) -> Option<String> {
    if data.len() < 64 {
        return None;
    }
    let offset = u256_to_usize(U256::from_be_slice(&data[0..32]))?;
    if offset.checked_add(32)? > data.len() {
        return None;
    }
    let length = u256_to_usize(U256::from_be_slice(&data[offset..offset + 32]))?;
    let end = offset.checked_add(32)?.checked_add(length)?;
    if end > data.len() {
        return None;
    }
    String::from_utf8(data[offset + 32..end].to_vec()).ok()
}

/// Converts a 256-bit word to a `usize`, returning `None` instead of panicking
/// when a malformed or adversarial RPC response encodes an offset/length that
/// doesn't fit — `U256::to::<usize>()` panics on overflow, which an untrusted
/// endpoint's response must never be allowed to trigger.
fn u256_to_usize(value: U256) -> Option<usize> {
    if value > U256::from(usize::MAX) {
        None
    } else {
        Some(value.to::<usize>())
    }
}

/// Outcome of a single `eth_call` attempt, already classified by the
/// error-discrimination heuristic below.
enum CallOutcome {
    Success(String),
    Network(String),
    Revert(String),
    ContractError(String),
}

/// Issues one `eth_call` against `endpoint` and classifies the result.
async fn eth_call(
    client: &reqwest::Client,
    endpoint: &str,
    contract: &ContractAddress,
    data: &[u8],
) -> CallOutcome {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_call",
        "params": [
            { "to": contract.lower_hex(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ],
    });

    let response = match client
        .post(endpoint)
        .json(&body)
        .timeout(RPC_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return CallOutcome::Network(format!("rpc fetch error: {e}")),
    };

    if !response.status().is_success() {
        return CallOutcome::Network(format!("rpc http {}", response.status().as_u16()));
    }

    let value: serde_json::Value = match response.json().await {
        Ok(v) => v,
        Err(e) => return CallOutcome::Network(format!("rpc fetch error: invalid JSON body: {e}")),
    };

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown JSON-RPC error")
            .to_string();
        return match classify_attempt(&message) {
            AttemptClass::Network => CallOutcome::Network(message),
            AttemptClass::Revert => CallOutcome::Revert(message),
            AttemptClass::Other => CallOutcome::ContractError(message),
        };
    }

    match value.get("result").and_then(|r| r.as_str()) {
        Some(hex_result) => {
            let bytes = match hex::decode(hex_result.trim_start_matches("0x")) {
                Ok(b) => b,
                Err(e) => return CallOutcome::ContractError(format!("malformed RPC result: {e}")),
            };
            match decode_abi_string(&bytes) {
                Some(uri) => CallOutcome::Success(uri),
                None => CallOutcome::ContractError("could not decode ABI string result".to_string()),
            }
        }
        None => CallOutcome::ContractError("non-string RPC result".to_string()),
    }
}

/// Records end-to-end resolve latency (cache-miss path only; a cache hit returns
/// before this is reachable) as a `chain`-labeled histogram.
fn record_resolve_duration(chain: ChainId, started: Instant) {
    metrics::histogram!("tokenlens_rpc_resolve_duration_ms", "chain" => chain.as_str())
        .record(started.elapsed().as_millis() as f64);
}

/// Resolves token URIs across a ranked endpoint pool, with an injected cache.
pub struct RpcResolver {
    client: reqwest::Client,
    cache: LruTtlCache<TokenKey, String>,
}

impl RpcResolver {
    pub fn new(client: reqwest::Client, cache_capacity: usize) -> Self {
        Self {
            client,
            cache: LruTtlCache::new(cache_capacity),
        }
    }

    /// Resolves (chain, contract, tokenId) to its raw contract-returned URI string.
    pub async fn resolve(
        &mut self,
        chain: ChainId,
        contract: ContractAddress,
        token_id: TokenId,
        request_override: Option<&str>,
    ) -> Result<String, ResolveError> {
        let key = TokenKey::new(chain, contract, token_id.clone());
        let now = Instant::now();
        if let Some(uri) = self.cache.get(&key, now) {
            tracing::debug!(%chain, %contract, %token_id, "token URI cache hit");
            metrics::counter!("tokenlens_uri_cache_hits_total", "chain" => chain.as_str()).increment(1);
            return Ok(uri);
        }
        metrics::counter!("tokenlens_uri_cache_misses_total", "chain" => chain.as_str()).increment(1);

        let pool = EndpointPool::build(chain, request_override);
        if pool.is_empty() {
            return Err(ResolveError::unknown(format!("no RPC endpoints configured for chain {chain}")));
        }

        tracing::debug!(%chain, %contract, %token_id, endpoints = pool.len(), "resolving token URI");
        let resolve_started = Instant::now();

        let token_uri_call = encode_call(SELECTOR_TOKEN_URI, &token_id)?;
        let uri_call = encode_call(SELECTOR_URI, &token_id)?;

        let mut attempts = Vec::new();

        for endpoint in pool.iter() {
            match eth_call(&self.client, endpoint, &contract, &token_uri_call).await {
                CallOutcome::Success(uri) => {
                    self.cache.set(key, uri.clone(), DEFAULT_URI_CACHE_TTL, Instant::now());
                    record_resolve_duration(chain, resolve_started);
                    return Ok(uri);
                }
                CallOutcome::Network(msg) => {
                    tracing::debug!(endpoint, error = %msg, "tokenURI call failed at transport layer, trying next endpoint");
                    attempts.push(EndpointAttempt { url: endpoint.to_string(), error: msg });
                    continue;
                }
                CallOutcome::ContractError(msg) => {
                    tracing::debug!(endpoint, error = %msg, "tokenURI call returned a contract error, trying next endpoint");
                    attempts.push(EndpointAttempt { url: endpoint.to_string(), error: msg });
                    continue;
                }
                CallOutcome::Revert(msg) => {
                    // Fall through to the ERC-1155 fallback on this same endpoint.
                    tracing::debug!(endpoint, error = %msg, "tokenURI reverted, falling back to ERC-1155 uri()");
                    attempts.push(EndpointAttempt { url: endpoint.to_string(), error: msg });
                }
            }

            match eth_call(&self.client, endpoint, &contract, &uri_call).await {
                CallOutcome::Success(raw_uri) => {
                    let substituted = substitute_token_id(&raw_uri, &token_id)?;
                    self.cache.set(key, substituted.clone(), DEFAULT_URI_CACHE_TTL, Instant::now());
                    record_resolve_duration(chain, resolve_started);
                    return Ok(substituted);
                }
                CallOutcome::Network(msg) => {
                    attempts.push(EndpointAttempt { url: endpoint.to_string(), error: msg });
                }
                CallOutcome::Revert(msg) | CallOutcome::ContractError(msg) => {
                    attempts.push(EndpointAttempt { url: endpoint.to_string(), error: msg });
                }
            }
        }

        record_resolve_duration(chain, resolve_started);
        let err = terminal_error(attempts);
        tracing::warn!(%chain, %contract, %token_id, kind = %err.kind, "exhausted all endpoints resolving token URI");
        Err(err)
    }

    /// Seeds the URI cache directly, bypassing any network call. Used by other
    /// modules' tests that need a resolved URI without standing up a mock RPC
    /// endpoint.
    #[cfg(test)]
    pub(crate) fn seed_for_test(&mut self, key: TokenKey, uri: String) {
        self.cache.set(key, uri, DEFAULT_URI_CACHE_TTL, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contract() -> ContractAddress {
        ContractAddress::parse("0x7bd29408f11d2bfc23c34f18275bbf23bb716bc7").unwrap()
    }

    #[test]
    fn encodes_tokenuri_call_with_correct_selector_and_word() {
        let id = TokenId::parse("14076").unwrap();
        let data = encode_call(SELECTOR_TOKEN_URI, &id).unwrap();
        assert_eq!(&data[0..4], &SELECTOR_TOKEN_URI);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[34..36], &[0x36, 0xfc]); // 14076 in hex
    }

    #[test]
    fn decodes_abi_string_result() {
        // offset=0x20, length=5, "hello" padded to 32 bytes
        let mut data = vec![0u8; 32];
        data[31] = 0x20;
        data.extend(vec![0u8; 32]);
        let len_idx = 32 + 31;
        data[len_idx] = 5;
        data.extend(b"hello");
        data.extend(vec![0u8; 32 - 5]);
        assert_eq!(decode_abi_string(&data), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn resolves_via_third_endpoint_after_two_timeouts() {
        // Two endpoints that never answer (connection refused acts as "network"
        // failure without needing a real timeout in the test), one that succeeds.
        let dead_a = "http://127.0.0.1:1";
        let dead_b = "http://127.0.0.1:2";

        let good = MockServer::start().await;
        let mut resp_data = vec![0u8; 32];
        resp_data[31] = 0x20;
        resp_data.extend(vec![0u8; 32]);
        resp_data[32 + 31] = 4;
        resp_data.extend(b"ipfs");
        resp_data.extend(vec![0u8; 28]);
        let result_hex = format!("0x{}", hex::encode(&resp_data));

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": result_hex
            })))
            .mount(&good)
            .await;

        let mut resolver = RpcResolver::new(reqwest::Client::new(), 100);
        std::env::set_var(
            "ETH_RPC_URLS",
            format!("{dead_a},{dead_b},{}", good.uri()),
        );

        let result = resolver
            .resolve(ChainId::Eth, contract(), TokenId::parse("1").unwrap(), None)
            .await;
        std::env::remove_var("ETH_RPC_URLS");

        assert_eq!(result.unwrap(), "ipfs");
    }

    #[tokio::test]
    async fn falls_back_to_erc1155_uri_after_tokenuri_reverts_on_every_endpoint() {
        let server = MockServer::start().await;

        let mut hits = 0u32;
        // tokenURI reverts; uri() succeeds with an {id} template.
        let revert_body = serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "error": { "code": 3, "message": "execution reverted" }
        });

        let mut success_data = vec![0u8; 32];
        success_data[31] = 0x20;
        success_data.extend(vec![0u8; 32]);
        let template = b"ipfs://base/{id}.json";
        success_data[32 + 31] = template.len() as u8;
        success_data.extend(template);
        let pad = (32 - (template.len() % 32)) % 32;
        success_data.extend(vec![0u8; pad]);
        let success_hex = format!("0x{}", hex::encode(&success_data));
        let _ = &mut hits;

        // wiremock can't branch on calldata easily without custom matchers, so we
        // use two endpoints: one always reverts (tokenURI case covers both calls
        // since the mock doesn't look at which selector was sent — it always
        // reverts), and one that always succeeds (covering the uri() fallback).
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(revert_body))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": success_hex
            })))
            .mount(&server)
            .await;

        let mut resolver = RpcResolver::new(reqwest::Client::new(), 100);
        std::env::set_var("ETH_RPC_URLS", server.uri());

        let result = resolver
            .resolve(ChainId::Eth, contract(), TokenId::parse("1").unwrap(), None)
            .await;
        std::env::remove_var("ETH_RPC_URLS");

        let uri = result.unwrap();
        assert!(!uri.contains("{id}"));
        assert!(uri.starts_with("ipfs://base/"));
    }

    #[tokio::test]
    async fn cache_hit_avoids_any_outbound_call() {
        let mut resolver = RpcResolver::new(reqwest::Client::new(), 100);
        let key = TokenKey::new(ChainId::Eth, contract(), TokenId::parse("1").unwrap());
        resolver
            .cache
            .set(key, "cached-uri".to_string(), DEFAULT_URI_CACHE_TTL, Instant::now());

        // No RPC env vars set at all — if the cache weren't hit this would fail
        // with "no RPC endpoints configured".
        std::env::remove_var("ETH_RPC_URLS");
        std::env::remove_var("ETH_RPC_URL");
        std::env::remove_var("RPC_URLS");
        std::env::remove_var("RPC_URL");

        let result = resolver
            .resolve(ChainId::Eth, contract(), TokenId::parse("1").unwrap(), None)
            .await;
        assert_eq!(result.unwrap(), "cached-uri");
    }
}
