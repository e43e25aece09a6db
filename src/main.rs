use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use zerorag::config::{self, Config};
use zerorag::embedding::{Embedder, HashEmbedder, HttpEmbedder};
use zerorag::generation::{Generator, HttpGenerator};
use zerorag::logging;
use zerorag::service::{App, router};
use zerorag::vector_store::{MemoryBackend, QdrantBackend, VectorBackend};

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let config = Arc::new(config::get_config().clone());
    let embedder = build_embedder(&config);
    let generator = build_generator();
    let primary_backend = build_backend(&config);

    let app = match App::bootstrap(config.clone(), embedder, generator, primary_backend).await {
        Ok(app) => app,
        Err(error) => {
            tracing::error!(%error, "failed to start zerorag");
            std::process::exit(1);
        }
    };

    let router = router(app.state.clone()).layer(TraceLayer::new_for_http()).layer(cors_layer(&config));

    let (listener, port) = bind_listener(&config).await.expect("failed to bind listener");
    tracing::info!(port, "zerorag listening");

    let service = router.into_make_service_with_connect_info::<std::net::SocketAddr>();
    let server = axum::serve(listener, service).with_graceful_shutdown(shutdown_signal());
    if let Err(error) = server.await {
        tracing::error!(%error, "server loop exited with an error");
    }

    app.shutdown(Duration::from_secs(config.upload_timeout_seconds)).await;
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<HeaderValue> = config.cors_origins.iter().filter_map(|origin| origin.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    }
}

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    match env::var("EMBEDDING_BASE_URL") {
        Ok(base_url) => {
            let model = env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string());
            Arc::new(HttpEmbedder::new(base_url, model, config.embedding_dim))
        }
        Err(_) => {
            tracing::warn!("EMBEDDING_BASE_URL not set; falling back to the deterministic hash embedder");
            Arc::new(HashEmbedder::new(config.embedding_dim))
        }
    }
}

fn build_generator() -> Arc<dyn Generator> {
    let base_url = env::var("GENERATION_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let model = env::var("GENERATION_MODEL").unwrap_or_else(|_| "llama3".to_string());
    Arc::new(HttpGenerator::new(base_url, model))
}

fn build_backend(config: &Config) -> Arc<dyn VectorBackend> {
    match env::var("QDRANT_URL") {
        Ok(url) => Arc::new(QdrantBackend::new(url, config.collection_name.clone(), env::var("QDRANT_API_KEY").ok())),
        Err(_) => {
            tracing::warn!("QDRANT_URL not set; falling back to the in-memory vector backend");
            Arc::new(MemoryBackend::new())
        }
    }
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await.map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "bound server port");
                return Ok((listener, port));
            }
            Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "port already in use; trying next");
                continue;
            }
            Err(error) => return Err(error),
        }
    }

    Err(std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no available port found in range 4100-4199"))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal");
}
