use thiserror::Error;

/// Fixed error taxonomy for token resolution and the health audit.
///
/// Every failure path in this crate collapses into one of these kinds; nothing
/// escapes as a raw transport or parse error once it crosses a module boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Endpoint transport failure, timeout, non-2xx from RPC, or all endpoints
    /// transport-failed.
    Rpc,
    /// At least one endpoint returned a non-network JSON-RPC error / revert after
    /// both ERC-721 and ERC-1155 attempts.
    Contract,
    /// Metadata URL GET returned non-2xx.
    MetadataFetch,
    /// Invalid contract, invalid token id, malformed `data:` URL, missing metadata
    /// URL, non-JSON body.
    Parsing,
    /// Both HEAD and ranged GET failed for the image URL.
    ImageFetch,
    /// Anything not classified.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Rpc => "rpc",
            ErrorKind::Contract => "contract",
            ErrorKind::MetadataFetch => "metadata_fetch",
            ErrorKind::Parsing => "parsing",
            ErrorKind::ImageFetch => "image_fetch",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// HTTP status a served response should use when this kind escapes to the caller.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Parsing => 400,
            ErrorKind::Contract => 404,
            ErrorKind::Rpc | ErrorKind::MetadataFetch | ErrorKind::ImageFetch => 502,
            ErrorKind::Unknown => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempt against a single RPC endpoint, kept around for the attempts list a
/// terminal resolver error carries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointAttempt {
    pub url: String,
    pub error: String,
}

/// A classified, typed error. Never a panic, never a bare string escaping the crate.
#[derive(Error, Debug, Clone, serde::Serialize, serde::Deserialize)]
#[error("{kind}: {message}")]
pub struct ResolveError {
    pub kind: ErrorKind,
    pub message: String,
    pub transient: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<EndpointAttempt>,
}

impl ResolveError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, transient: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            transient,
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<EndpointAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message, false)
    }

    pub fn metadata_fetch(message: impl Into<String>, transient: bool) -> Self {
        Self::new(ErrorKind::MetadataFetch, message, transient)
    }

    pub fn image_fetch(message: impl Into<String>, transient: bool) -> Self {
        Self::new(ErrorKind::ImageFetch, message, transient)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message, false)
    }
}

/// Messages containing any of these substrings (case-insensitive) indicate a
/// transport-layer failure rather than a contract-level rejection.
const NETWORK_MARKERS: &[&str] = &["timeout", "aborted", "fetch", "network", "rpc http"];

/// Messages containing any of these substrings (case-insensitive) indicate the
/// contract actively rejected the call (revert / unsupported selector).
const REVERT_MARKERS: &[&str] = &["revert", "execution reverted", "call exception"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    Network,
    Revert,
    Other,
}

/// Classifies a single error message by the network-vs-revert heuristic above.
pub fn classify_attempt(message: &str) -> AttemptClass {
    let lower = message.to_lowercase();
    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        AttemptClass::Network
    } else if REVERT_MARKERS.iter().any(|m| lower.contains(m)) {
        AttemptClass::Revert
    } else {
        AttemptClass::Other
    }
}

/// Given the accumulated per-endpoint attempts after exhausting the pool, picks the
/// terminal error: all-network failures become `rpc` + transient, anything else
/// becomes `contract` + terminal.
pub fn terminal_error(attempts: Vec<EndpointAttempt>) -> ResolveError {
    let all_network = !attempts.is_empty()
        && attempts
            .iter()
            .all(|a| classify_attempt(&a.error) == AttemptClass::Network);

    if all_network {
        ResolveError::new(
            ErrorKind::Rpc,
            "all endpoints failed at the transport layer",
            true,
        )
        .with_attempts(attempts)
    } else {
        ResolveError::new(
            ErrorKind::Contract,
            "tokenURI/uri reverted or was unsupported on every endpoint",
            false,
        )
        .with_attempts(attempts)
    }
}

/// Classifies a `metadata_fetch` HTTP status: transient unless the status is one
/// of {400, 404, 410}.
pub fn metadata_status_transient(status: u16) -> bool {
    !matches!(status, 400 | 404 | 410)
}

/// Classifies an `image_fetch` failure cause: transient when the cause looks like
/// a timeout/abort/fetch failure, terminal otherwise.
pub fn image_fetch_transient(message: &str) -> bool {
    classify_attempt(message) == AttemptClass::Network
}
