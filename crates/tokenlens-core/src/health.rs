//! Health classifier: orchestrates the resolver and fetch pipelines into a
//! single per-token [`AuditRecord`].

use std::time::{Duration, Instant};

use crate::metadata::MetadataResolver;
use crate::pin::PinProbe;
use crate::rpc::RpcResolver;
use crate::storage::{classify_storage, extract_ipfs_cid, registrable_domain};
use crate::types::{AuditRecord, ImageFormat, StorageKind};

const IMAGE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn image_format_from_content_type(content_type: &str) -> ImageFormat {
    let lower = content_type.to_lowercase();
    if lower.contains("png") {
        ImageFormat::Png
    } else if lower.contains("jpeg") || lower.contains("jpg") {
        ImageFormat::Jpeg
    } else if lower.contains("gif") {
        ImageFormat::Gif
    } else if lower.contains("webp") {
        ImageFormat::Webp
    } else if lower.contains("svg") {
        ImageFormat::Svg
    } else if lower.contains("bmp") {
        ImageFormat::Bmp
    } else if lower.contains("avif") {
        ImageFormat::Avif
    } else {
        ImageFormat::Unknown
    }
}

fn empty_audit_record() -> AuditRecord {
    AuditRecord {
        metadata_ok: false,
        image_ok: false,
        error_kind: None,
        is_transient: None,
        error_message: None,
        metadata_storage: None,
        image_storage: None,
        metadata_ipfs_pin_status: None,
        image_ipfs_pin_status: None,
        metadata_centralized_domain: None,
        image_centralized_domain: None,
        metadata_response_time_ms: None,
        image_response_time_ms: None,
        metadata_is_slow: None,
        image_is_slow: None,
        image_format: None,
        image_size_bytes: None,
        metadata_uri: None,
        image_uri: None,
    }
}

/// Fills in storage classification + pin status for one URI, mutating the two
/// out-parameters shared by both the metadata and image passes.
async fn classify_storage_and_pin(
    uri: &str,
    pins: &PinProbe,
) -> (StorageKind, Option<String>, Option<crate::types::PinStatus>) {
    let storage = classify_storage(uri);
    match storage {
        StorageKind::Centralized => (storage, registrable_domain(uri), None),
        StorageKind::Ipfs => {
            let pin_status = match extract_ipfs_cid(uri) {
                Some(cid) => Some(pins.check(&cid).await),
                None => Some(crate::types::PinStatus::Unknown),
            };
            (storage, None, pin_status)
        }
        _ => (storage, None, None),
    }
}

/// Runs the full single-token health audit.
pub async fn audit_token(
    rpc: &mut RpcResolver,
    metadata_resolver: &mut MetadataResolver,
    pins: &PinProbe,
    http: &reqwest::Client,
    chain: crate::chain::ChainId,
    contract_raw: &str,
    token_id_raw: &str,
    request_override: Option<&str>,
    skip_cache: bool,
) -> AuditRecord {
    let mut record = empty_audit_record();

    let metadata = match metadata_resolver
        .resolve(rpc, chain, contract_raw, token_id_raw, request_override, skip_cache)
        .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%chain, contract = contract_raw, token_id = token_id_raw, kind = %e.kind, "audit: metadata resolution failed");
            record.error_kind = Some(e.kind);
            record.is_transient = Some(e.transient);
            record.error_message = Some(e.message);
            return record;
        }
    };

    record.metadata_ok = true;
    record.metadata_uri = Some(metadata.metadata_uri.clone());
    record.image_uri = metadata.image_uri.clone();

    let (storage, domain, pin_status) = classify_storage_and_pin(&metadata.metadata_uri, pins).await;
    record.metadata_storage = Some(storage);
    record.metadata_centralized_domain = domain;
    record.metadata_ipfs_pin_status = pin_status;

    let Some(image_url) = metadata.image_url.as_deref() else {
        // Absence of an image field is not a failure.
        record.image_ok = true;
        return record;
    };

    let started = Instant::now();
    let probe = probe_image(http, image_url).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match probe {
        Ok((content_type, content_length)) => {
            record.image_ok = true;
            record.image_response_time_ms = Some(elapsed_ms);
            record.image_is_slow = Some(AuditRecord::slow(elapsed_ms));
            record.image_format = Some(image_format_from_content_type(&content_type));
            record.image_size_bytes = content_length;
        }
        Err(e) => {
            tracing::warn!(image_url, kind = %e.kind, "audit: image probe failed");
            record.image_ok = false;
            record.error_kind = Some(e.kind);
            record.is_transient = Some(e.transient);
            record.error_message = Some(e.message);
            record.image_response_time_ms = Some(elapsed_ms);
            record.image_is_slow = Some(AuditRecord::slow(elapsed_ms));
        }
    }

    let image_raw = metadata.image_uri.as_deref().unwrap_or(image_url);
    let (storage, domain, pin_status) = classify_storage_and_pin(image_raw, pins).await;
    record.image_storage = Some(storage);
    record.image_centralized_domain = domain;
    record.image_ipfs_pin_status = pin_status;

    record
}

/// HEAD, falling back to a ranged GET, against an image URL.
async fn probe_image(
    client: &reqwest::Client,
    url: &str,
) -> Result<(String, Option<u64>), crate::error::ResolveError> {
    let head_result = client.head(url).timeout(IMAGE_PROBE_TIMEOUT).send().await;

    if let Ok(response) = &head_result {
        if response.status().is_success() {
            return Ok(extract_probe_headers(response));
        }
    }

    let ranged = client
        .get(url)
        .header(reqwest::header::RANGE, "bytes=0-10")
        .timeout(IMAGE_PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| crate::error::ResolveError::image_fetch(format!("image fetch error: {e}"), true))?;

    if ranged.status().is_success() {
        Ok(extract_probe_headers(&ranged))
    } else {
        let status = ranged.status().as_u16();
        Err(crate::error::ResolveError::image_fetch(
            format!("image HEAD and ranged GET both failed, last status {status}"),
            crate::error::image_fetch_transient(&format!("rpc http {status}")),
        ))
    }
}

fn extract_probe_headers(response: &reqwest::Response) -> (String, Option<u64>) {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    (content_type, content_length)
}
