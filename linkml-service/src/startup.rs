use crate::config::{CapabilityBackend, ServiceConfig};
use crate::handlers;
use crate::services::mock::{MockAssistant, MockGenerator, MockLinter};
use crate::services::{
    Assistant, CodeGenerator, CommandExecutor, CommandGenerator, CommandLinter, Dispatcher,
    OpenAiAssistant, SchemaLinter,
};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub dispatcher: Dispatcher,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    pub async fn build(config: ServiceConfig) -> Result<Self, AppError> {
        let dispatcher = build_dispatcher(&config).await.map_err(|e| {
            tracing::error!("Failed to initialize capabilities: {}", e);
            e
        })?;

        let state = AppState {
            config: config.clone(),
            dispatcher,
        };
        let app = build_router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

/// Wires the configured capability backends into a dispatcher.
pub async fn build_dispatcher(config: &ServiceConfig) -> Result<Dispatcher, AppError> {
    tokio::fs::create_dir_all(&config.scratch_dir).await.map_err(|e| {
        tracing::error!(
            "Failed to create scratch directory {}: {}",
            config.scratch_dir.display(),
            e
        );
        AppError::from(e)
    })?;

    let (generator, linter, assistant): (
        Arc<dyn CodeGenerator>,
        Arc<dyn SchemaLinter>,
        Result<Arc<dyn Assistant>, String>,
    ) = match config.backend {
        CapabilityBackend::Mock => {
            tracing::warn!("Using in-process mock capabilities");
            (
                Arc::new(MockGenerator),
                Arc::new(MockLinter::new(Vec::new())),
                Ok(Arc::new(MockAssistant::new("mock-thread", None))),
            )
        }
        CapabilityBackend::Command => {
            let assistant = config.openai.settings().and_then(|settings| {
                OpenAiAssistant::new(settings)
                    .map(|a| Arc::new(a) as Arc<dyn Assistant>)
                    .map_err(|e| e.to_string())
            });
            if let Err(reason) = &assistant {
                tracing::warn!(reason = %reason, "Assistant endpoint disabled");
            }

            (
                Arc::new(CommandGenerator::new(
                    config.generator.command(),
                    CommandExecutor::new(config.generator.timeout),
                    config.scratch_dir.clone(),
                )),
                Arc::new(CommandLinter::new(
                    config.linter.command(),
                    CommandExecutor::new(config.linter.timeout),
                )),
                assistant,
            )
        }
    };

    Ok(Dispatcher::new(
        generator,
        linter,
        assistant,
        config.scratch_dir.clone(),
    ))
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.http.max_body_bytes;
    let cors = cors_layer(&state.config.http.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/gen-pydantic/", post(handlers::generate_download))
        .route("/gen-pydantic", post(handlers::generate_download))
        .route("/api/gen-pydantic/", post(handlers::generate_inline))
        .route("/api/gen-pydantic", post(handlers::generate_inline))
        .route("/api/validate-linkml/", post(handlers::validate_schema))
        .route("/api/validate-linkml", post(handlers::validate_schema))
        .route("/api/openai/generate", post(handlers::forward_to_assistant))
        .route("/api/openai/generate/", post(handlers::forward_to_assistant))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Ignoring invalid CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
