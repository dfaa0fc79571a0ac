mod ads;
mod aggregate;
mod api;
mod browser;
mod config;
mod enrichment;
mod error;
mod extract;
mod redirect;
mod scanner;
mod stealth;
mod strategies;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;

#[derive(OpenApi)]
#[openapi(
    paths(api::health, api::search_ads),
    components(schemas(
        api::SearchRequest,
        api::SearchResponse,
        api::HealthResponse,
        crate::ads::Ad,
        crate::ads::Sitelink,
        crate::ads::CreativeSummary
    )),
    tags((name = "ads", description = "Sponsored Ad Intelligence API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let cors = cors_layer(&config);
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(api::AppState { config });

    let app = Router::new()
        .merge(SwaggerUi::new("/adspy-swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::health))
        .route("/search", post(api::search_ads))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!("Starting AdSpy service v{} on {}", api::SERVICE_VERSION, listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
