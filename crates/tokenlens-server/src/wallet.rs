//! Opaque wallet-listing adapter. This module owns only the shape of its items
//! and pagination, never indexer logic itself — it is a thin client for a
//! third-party wallet-NFT indexer, not an indexer in its own right.

use serde::Deserialize;

use tokenlens_core::{ChainId, ErrorKind, ResolveError};

/// Heuristic safety bound on items per page — not a documented contract, just a
/// sane default a caller can override via [`WalletAdapter::with_page_size_cap`].
pub const DEFAULT_PAGE_SIZE_CAP: usize = 2000;

/// One token entry as returned by the wallet indexer.
#[derive(Debug, Clone)]
pub struct WalletItem {
    pub contract: String,
    pub token_id: String,
    pub chain: ChainId,
    pub title: Option<String>,
    pub collection: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WalletPage {
    pub items: Vec<WalletItem>,
    pub next_page_key: Option<String>,
}

fn alchemy_network(chain: ChainId) -> Option<&'static str> {
    match chain {
        ChainId::Eth => Some("eth-mainnet"),
        ChainId::Arb => Some("arb-mainnet"),
        ChainId::Op => Some("opt-mainnet"),
        ChainId::Base => Some("base-mainnet"),
        ChainId::Polygon => Some("polygon-mainnet"),
        ChainId::Zksync => Some("zksync-mainnet"),
        ChainId::Linea | ChainId::Scroll | ChainId::PolygonZkevm => None,
    }
}

/// Alchemy-shaped wallet NFT listing client, gated on `ALCHEMY_API_KEY`.
pub struct WalletAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    page_size_cap: usize,
}

impl WalletAdapter {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key, page_size_cap: DEFAULT_PAGE_SIZE_CAP }
    }

    pub fn with_page_size_cap(mut self, cap: usize) -> Self {
        self.page_size_cap = cap;
        self
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Lists one page of a wallet's owned tokens on `chain`, following Alchemy's
    /// `getNFTsForOwner` pagination cursor.
    pub async fn list_tokens(&self, chain: ChainId, wallet: &str, page_key: Option<&str>) -> Result<WalletPage, ResolveError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ResolveError::unknown("wallet adapter unavailable: ALCHEMY_API_KEY not set"))?;

        let network = alchemy_network(chain).ok_or_else(|| {
            ResolveError::parsing(format!("wallet adapter has no provider mapping for chain {chain}"))
        })?;

        let url = format!("https://{network}.g.alchemy.com/nft/v3/{api_key}/getNFTsForOwner");
        let page_size = self.page_size_cap.min(DEFAULT_PAGE_SIZE_CAP).to_string();

        let mut query: Vec<(&str, &str)> = vec![("owner", wallet), ("pageSize", &page_size)];
        if let Some(key) = page_key {
            query.push(("pageKey", key));
        }

        let response = self.client.get(&url).query(&query).send().await.map_err(|e| {
            ResolveError::new(ErrorKind::Unknown, format!("wallet adapter fetch error: {e}"), true)
        })?;

        if !response.status().is_success() {
            return Err(ResolveError::new(
                ErrorKind::Unknown,
                format!("wallet adapter returned {}", response.status().as_u16()),
                true,
            ));
        }

        let body: AlchemyResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::parsing(format!("wallet adapter returned a non-JSON body: {e}")))?;

        let items = body
            .owned_nfts
            .into_iter()
            .map(|nft| WalletItem {
                contract: nft.contract.address,
                token_id: nft.token_id,
                chain,
                title: nft.name,
                collection: nft.collection.and_then(|c| c.name),
                thumbnail_url: nft.image.and_then(|i| i.thumbnail_url.or(i.cached_url)),
            })
            .collect();

        Ok(WalletPage { items, next_page_key: body.page_key })
    }
}

#[derive(Debug, Deserialize)]
struct AlchemyResponse {
    #[serde(rename = "ownedNfts", default)]
    owned_nfts: Vec<AlchemyNft>,
    #[serde(rename = "pageKey")]
    page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlchemyNft {
    contract: AlchemyContract,
    #[serde(rename = "tokenId")]
    token_id: String,
    name: Option<String>,
    collection: Option<AlchemyCollection>,
    image: Option<AlchemyImage>,
}

#[derive(Debug, Deserialize)]
struct AlchemyContract {
    address: String,
}

#[derive(Debug, Deserialize)]
struct AlchemyCollection {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlchemyImage {
    #[serde(rename = "thumbnailUrl")]
    thumbnail_url: Option<String>,
    #[serde(rename = "cachedUrl")]
    cached_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_without_api_key() {
        let adapter = WalletAdapter::new(reqwest::Client::new(), None);
        assert!(!adapter.is_available());
        let err = adapter.list_tokens(ChainId::Eth, "0xabc", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn rejects_chain_with_no_provider_mapping() {
        let adapter = WalletAdapter::new(reqwest::Client::new(), Some("key".to_string()));
        let err = adapter.list_tokens(ChainId::Scroll, "0xabc", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parsing);
    }

    #[test]
    fn page_size_cap_is_clamped_to_the_default_bound() {
        let adapter = WalletAdapter::new(reqwest::Client::new(), Some("key".to_string())).with_page_size_cap(50_000);
        assert_eq!(adapter.page_size_cap.min(DEFAULT_PAGE_SIZE_CAP), DEFAULT_PAGE_SIZE_CAP);
    }
}
