//! Chain identity normalization and per-chain RPC endpoint pools.

use std::collections::HashSet;

use crate::error::ResolveError;

/// Closed set of chains this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainId {
    Eth,
    Arb,
    Op,
    Base,
    Polygon,
    Zksync,
    Linea,
    Scroll,
    PolygonZkevm,
}

impl ChainId {
    /// Normalizes a caller-supplied chain string: folds case and known aliases.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let lower = raw.trim().to_lowercase();
        let chain = match lower.as_str() {
            "eth" | "ethereum" | "mainnet" => ChainId::Eth,
            "arb" | "arbitrum" | "arbitrum-one" => ChainId::Arb,
            "op" | "optimism" => ChainId::Op,
            "base" => ChainId::Base,
            "polygon" | "matic" => ChainId::Polygon,
            "zksync" | "zksync-era" => ChainId::Zksync,
            "linea" => ChainId::Linea,
            "scroll" => ChainId::Scroll,
            "polygon-zkevm" | "polygon_zkevm" | "zkevm" => ChainId::PolygonZkevm,
            other => {
                return Err(ResolveError::parsing(format!("unknown chain: {other}")));
            }
        };
        Ok(chain)
    }

    /// Canonical identifier, used both for display and as the env-var prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Eth => "eth",
            ChainId::Arb => "arb",
            ChainId::Op => "op",
            ChainId::Base => "base",
            ChainId::Polygon => "polygon",
            ChainId::Zksync => "zksync",
            ChainId::Linea => "linea",
            ChainId::Scroll => "scroll",
            ChainId::PolygonZkevm => "polygon-zkevm",
        }
    }

    /// Upper-snake-case form used to build the `<CHAIN>_RPC_URLS` env var name.
    fn env_prefix(&self) -> &'static str {
        match self {
            ChainId::Eth => "ETH",
            ChainId::Arb => "ARB",
            ChainId::Op => "OP",
            ChainId::Base => "BASE",
            ChainId::Polygon => "POLYGON",
            ChainId::Zksync => "ZKSYNC",
            ChainId::Linea => "LINEA",
            ChainId::Scroll => "SCROLL",
            ChainId::PolygonZkevm => "POLYGON_ZKEVM",
        }
    }

    /// Built-in default RPC endpoints, used only when no override/env var supplies
    /// any for this chain.
    fn builtin_defaults(&self) -> &'static [&'static str] {
        match self {
            ChainId::Eth => &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
            ChainId::Arb => &["https://arb1.arbitrum.io/rpc"],
            ChainId::Op => &["https://mainnet.optimism.io"],
            ChainId::Base => &["https://mainnet.base.org"],
            ChainId::Polygon => &["https://polygon-rpc.com"],
            ChainId::Zksync => &["https://mainnet.era.zksync.io"],
            ChainId::Linea => &["https://rpc.linea.build"],
            ChainId::Scroll => &["https://rpc.scroll.io"],
            ChainId::PolygonZkevm => &["https://zkevm-rpc.com"],
        }
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Splits a comma-separated env var value into trimmed, non-empty URLs.
fn read_env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Reads a chain-specific env var, trying the plural (`_URLS`, comma-separated)
/// form first, falling back to the singular (`_URL`) form.
fn read_chain_env(chain: &ChainId) -> Vec<String> {
    let prefix = chain.env_prefix();
    let mut urls = read_env_list(&format!("{prefix}_RPC_URLS"));
    if urls.is_empty() {
        urls = read_env_list(&format!("{prefix}_RPC_URL"));
    }
    urls
}

/// Reads the global env vars that apply to every chain.
fn read_global_env() -> Vec<String> {
    let mut urls = read_env_list("RPC_URLS");
    if urls.is_empty() {
        urls = read_env_list("RPC_URL");
    }
    urls
}

/// Ordered, de-duplicated RPC endpoint list for one chain.
///
/// Built from, in priority order: a request-scoped override, the chain-specific env
/// var, the global env var, then built-in defaults. Duplicates are removed, keeping
/// the first (highest-priority) occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPool {
    urls: Vec<String>,
}

impl EndpointPool {
    pub fn build(chain: ChainId, request_override: Option<&str>) -> Self {
        let mut ordered = Vec::new();
        if let Some(url) = request_override {
            ordered.push(url.to_string());
        }
        ordered.extend(read_chain_env(&chain));
        ordered.extend(read_global_env());
        ordered.extend(chain.builtin_defaults().iter().map(|s| s.to_string()));

        let mut seen = HashSet::new();
        let urls = ordered
            .into_iter()
            .filter(|u| seen.insert(u.clone()))
            .collect();

        Self { urls }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that touch process env must be serialized; std::env is global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(ChainId::parse("ethereum").unwrap(), ChainId::Eth);
        assert_eq!(ChainId::parse("ETH").unwrap(), ChainId::Eth);
        assert_eq!(ChainId::parse(" Polygon ").unwrap(), ChainId::Polygon);
        assert!(ChainId::parse("solana").is_err());
    }

    #[test]
    fn pool_order_and_dedup() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("ETH_RPC_URLS");
        std::env::remove_var("ETH_RPC_URL");
        std::env::remove_var("RPC_URLS");
        std::env::remove_var("RPC_URL");

        std::env::set_var("ETH_RPC_URLS", "https://a.example,https://b.example,https://a.example");
        std::env::set_var("RPC_URLS", "https://b.example,https://c.example");

        let pool = EndpointPool::build(ChainId::Eth, Some("https://override.example"));
        let urls: Vec<_> = pool.iter().collect();
        assert_eq!(
            urls,
            vec![
                "https://override.example",
                "https://a.example",
                "https://b.example",
                "https://c.example",
                "https://eth.llamarpc.com",
                "https://rpc.ankr.com/eth",
            ]
        );

        std::env::remove_var("ETH_RPC_URLS");
        std::env::remove_var("RPC_URLS");
    }

    #[test]
    fn pools_never_collide_across_chains() {
        let _guard = ENV_LOCK.lock().unwrap();
        let eth = EndpointPool::build(ChainId::Eth, None);
        let polygon = EndpointPool::build(ChainId::Polygon, None);
        assert_ne!(eth.as_slice(), polygon.as_slice());
    }
}
