use clap::Parser;

/// Process configuration, loaded once at startup from env vars and ambient
/// server knobs. A typed `clap::Parser` struct, same derive+env idiom as the rest
/// of the pack reaches for when a config surface is closed-set and known at compile
/// time; the *resolver's* own per-chain RPC overrides stay on manual `std::env::var`
/// reads in `tokenlens_core::chain` since that surface is open-ended (one var per
/// chain) and clap cannot model it.
#[derive(Debug, Clone, Parser)]
#[command(name = "tokenlens-server", about = "NFT metadata, image, and health-audit HTTP surface")]
pub struct Config {
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "API_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Base URL used by the IPFS gateway rewrite; mirrored into `IPFS_GATEWAY` for
    /// `tokenlens_core::uri::configured_gateway` to pick up.
    #[arg(long, env = "IPFS_GATEWAY", default_value = "https://ipfs.io/ipfs")]
    pub ipfs_gateway: String,

    /// Per-cache entry capacity shared by the URI, metadata, and image-byte
    /// caches inside `tokenlens_core`.
    #[arg(long, env = "CACHE_CAPACITY", default_value_t = 10_000)]
    pub cache_capacity: usize,

    /// Max in-flight single-token audits during a wallet scan.
    #[arg(long, env = "AUDIT_CONCURRENCY", default_value_t = 8)]
    pub audit_concurrency: usize,

    /// Gates inclusion of structured error detail in responses via `?debug=1`.
    #[arg(long, env = "DEV_MODE", default_value_t = false)]
    pub dev_mode: bool,

    /// When set, enables the wallet-listing adapter. Not a CLI flag: a secret has
    /// no business being typeable on a command line.
    #[arg(skip)]
    pub alchemy_api_key: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let mut config = Config::parse();
        config.alchemy_api_key = std::env::var("ALCHEMY_API_KEY").ok();
        if std::env::var("IPFS_GATEWAY").is_err() {
            std::env::set_var("IPFS_GATEWAY", &config.ipfs_gateway);
        }
        config
    }
}
