use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tokenlens_core::cache::LruTtlCache;
use tokenlens_core::image::ImageFetcher;
use tokenlens_core::{MetadataResolver, PinProbe, RpcResolver};

mod config;
mod error;
mod handlers;
mod wallet;

use config::Config;
use wallet::WalletAdapter;

pub struct AppState {
    pub rpc: Mutex<RpcResolver>,
    pub metadata: Mutex<MetadataResolver>,
    pub images: Mutex<ImageFetcher>,
    pub transforms: Mutex<LruTtlCache<String, Vec<u8>>>,
    pub pins: PinProbe,
    pub wallet: WalletAdapter,
    pub http: reqwest::Client,
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenlens_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tokenlens server");

    dotenvy::dotenv().ok();
    let config = Config::load();

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let http = reqwest::Client::new();
    let state = Arc::new(AppState {
        rpc: Mutex::new(RpcResolver::new(http.clone(), config.cache_capacity)),
        metadata: Mutex::new(MetadataResolver::new(http.clone(), config.cache_capacity)),
        images: Mutex::new(ImageFetcher::new(http.clone(), config.cache_capacity)),
        transforms: Mutex::new(LruTtlCache::new(config.cache_capacity)),
        pins: PinProbe::with_defaults(http.clone()),
        wallet: WalletAdapter::new(http.clone(), config.alchemy_api_key.clone()),
        http,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/{chain}/{contract}/{token_id}", get(handlers::metadata::get_metadata))
        .route("/{chain}/{contract}/{token_id}/image", get(handlers::image::get_image))
        .route("/{chain}/{contract}/{token_id}/audit", get(handlers::audit::audit_single))
        .route("/audit/wallet", axum::routing::post(handlers::audit::audit_wallet))
        .route("/health", get(|| async { "OK" }))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
