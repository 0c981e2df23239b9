//! `data:` URL decoding, IPFS gateway rewriting, and ERC-1155 `{id}` substitution.

use base64::Engine;

use crate::error::ResolveError;
use crate::types::TokenId;

/// Default public IPFS gateway, used when `IPFS_GATEWAY` is unset.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs";

/// Reads the configured gateway base URL (no trailing slash), falling back to the
/// default public gateway.
pub fn configured_gateway() -> String {
    std::env::var("IPFS_GATEWAY")
        .ok()
        .map(|v| v.trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_IPFS_GATEWAY.to_string())
}

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Decodes a `data:[<mime>][;charset=...][;base64],<payload>` URL using a
/// token-split grammar.
///
/// The segment before the first comma is split on `;`; the first token containing
/// a `/` becomes the mime type (default `application/octet-stream`); if any token
/// equals the literal `base64`, the payload is base64-decoded, otherwise it is
/// percent-decoded.
pub fn decode_data_url(input: &str) -> Result<DataUrl, ResolveError> {
    let rest = input
        .strip_prefix("data:")
        .ok_or_else(|| ResolveError::parsing("not a data: URL"))?;

    let comma = rest
        .find(',')
        .ok_or_else(|| ResolveError::parsing("data: URL missing comma separator"))?;
    let (header, payload) = rest.split_at(comma);
    let payload = &payload[1..]; // skip the comma itself

    let mut mime = None;
    let mut is_base64 = false;
    if !header.is_empty() {
        for token in header.split(';') {
            if token == "base64" {
                is_base64 = true;
            } else if mime.is_none() && token.contains('/') {
                mime = Some(token.to_string());
            }
        }
    }
    let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());

    let bytes = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| ResolveError::parsing(format!("malformed base64 in data: URL: {e}")))?
    } else {
        percent_encoding::percent_decode_str(payload)
            .decode_utf8()
            .map_err(|e| ResolveError::parsing(format!("malformed percent-encoding in data: URL: {e}")))?
            .into_owned()
            .into_bytes()
    };

    Ok(DataUrl { mime, bytes })
}

/// Encodes bytes back into a `data:` URL, matching [`decode_data_url`]'s grammar.
/// Used only by round-trip tests; the resolver never needs to construct `data:`
/// URLs itself.
pub fn encode_data_url(mime: &str, bytes: &[u8], use_base64: bool) -> String {
    if use_base64 {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        format!("data:{mime};base64,{encoded}")
    } else {
        let encoded =
            percent_encoding::utf8_percent_encode(&String::from_utf8_lossy(bytes), percent_encoding::NON_ALPHANUMERIC)
                .to_string();
        format!("data:{mime},{encoded}")
    }
}

/// Rewrites `ipfs://ipfs/<cid...>` and `ipfs://<cid...>` to `<gateway>/<cid...>`.
/// Any other input passes through unchanged.
pub fn rewrite_ipfs(uri: &str, gateway: &str) -> String {
    if let Some(rest) = uri.strip_prefix("ipfs://ipfs/") {
        return format!("{gateway}/{rest}");
    }
    if let Some(rest) = uri.strip_prefix("ipfs://") {
        return format!("{gateway}/{rest}");
    }
    uri.to_string()
}

/// Rewrites `ar://<tx>` to the Arweave HTTP gateway, needed to resolve
/// arweave-sourced `metadataUri`s to an HTTP URL before fetching them.
pub fn rewrite_arweave(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("ar://") {
        format!("https://arweave.net/{rest}")
    } else {
        uri.to_string()
    }
}

/// Rewrites any recognized non-HTTP scheme to an HTTP(S) URL; `data:` passes
/// through unchanged.
pub fn rewrite_to_http(uri: &str, gateway: &str) -> String {
    if uri.starts_with("data:") {
        return uri.to_string();
    }
    if uri.starts_with("ar://") || uri.contains("arweave.net/") {
        return rewrite_arweave(uri);
    }
    rewrite_ipfs(uri, gateway)
}

/// Substitutes every `{id}` occurrence with the token id's 64-char lowercase hex
/// form. A no-op when `{id}` is absent.
pub fn substitute_token_id(uri: &str, token_id: &TokenId) -> Result<String, ResolveError> {
    if !uri.contains("{id}") {
        return Ok(uri.to_string());
    }
    let hex_id = token_id.to_erc1155_hex()?;
    Ok(uri.replace("{id}", &hex_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_data_url() {
        let url = "data:application/json;base64,eyJhIjoxfQ==";
        let decoded = decode_data_url(url).unwrap();
        assert_eq!(decoded.mime, "application/json");
        assert_eq!(decoded.bytes, br#"{"a":1}"#);
    }

    #[test]
    fn decodes_percent_encoded_data_url_with_default_mime() {
        let url = "data:,hello%20world";
        let decoded = decode_data_url(url).unwrap();
        assert_eq!(decoded.mime, "application/octet-stream");
        assert_eq!(decoded.bytes, b"hello world");
    }

    #[test]
    fn rejects_missing_comma() {
        assert!(decode_data_url("data:application/json;base64").is_err());
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(decode_data_url("data:text/plain;base64,not-valid-base64!!!").is_err());
    }

    #[test]
    fn data_url_round_trips_base64() {
        let mime = "application/json";
        let bytes = br#"{"x":true}"#;
        let encoded = encode_data_url(mime, bytes, true);
        let decoded = decode_data_url(&encoded).unwrap();
        assert_eq!(decoded.mime, mime);
        assert_eq!(decoded.bytes, bytes);
    }

    #[test]
    fn data_url_round_trips_percent_encoded() {
        let mime = "text/plain";
        let bytes = b"hello, world!";
        let encoded = encode_data_url(mime, bytes, false);
        let decoded = decode_data_url(&encoded).unwrap();
        assert_eq!(decoded.mime, mime);
        assert_eq!(decoded.bytes, bytes);
    }

    #[test]
    fn rewrites_ipfs_uri_bytewise() {
        let gateway = "https://my-gateway.example/ipfs";
        assert_eq!(
            rewrite_ipfs("ipfs://QmCid123/meta.json", gateway),
            "https://my-gateway.example/ipfs/QmCid123/meta.json"
        );
        assert_eq!(
            rewrite_ipfs("ipfs://ipfs/QmCid123/meta.json", gateway),
            "https://my-gateway.example/ipfs/QmCid123/meta.json"
        );
    }

    #[test]
    fn non_ipfs_uri_passes_through_unchanged() {
        let gateway = "https://gw.example/ipfs";
        assert_eq!(rewrite_ipfs("https://example.com/a.png", gateway), "https://example.com/a.png");
    }

    #[test]
    fn substitution_leaves_no_id_placeholder_and_is_64_hex_chars() {
        let token_id = TokenId::parse("1").unwrap();
        let out = substitute_token_id("https://x.example/{id}.json", &token_id).unwrap();
        assert!(!out.contains("{id}"));
        let hex_part = out.strip_prefix("https://x.example/").unwrap().strip_suffix(".json").unwrap();
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn substitution_is_noop_without_placeholder() {
        let token_id = TokenId::parse("1").unwrap();
        let out = substitute_token_id("https://x.example/static.json", &token_id).unwrap();
        assert_eq!(out, "https://x.example/static.json");
    }
}
