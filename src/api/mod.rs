//! HTTP JSON surface over the snapshot store.
//!
//! Endpoints (also mounted under `/api`):
//! - GET  /health
//! - GET  /resources                          - merged resource list
//! - GET  /ec2, /rds, /ebs, /cloudwatch-logs  - one resource class
//! - GET  /cost-summary                       - cached cost summary
//! - GET  /summary                            - whole snapshot
//! - POST /refresh                            - synchronous refresh
//! - GET  /cost?start=..&end=..               - uncached cost query
//!
//! Read endpoints answer 503 until the first refresh has been installed.

mod handlers;
mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use self::handlers::{
    handle_class, handle_cost, handle_cost_summary, handle_health, handle_not_found,
    handle_refresh, handle_resources, handle_summary,
};
pub use self::state::AppState;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::ResourceClass;

/// How long browsers may cache a preflight answer.
const CORS_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn routes() -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/health", get(handle_health))
        .route("/resources", get(handle_resources))
        .route("/cost-summary", get(handle_cost_summary))
        .route("/summary", get(handle_summary))
        .route("/refresh", post(handle_refresh))
        .route("/cost", get(handle_cost));
    for class in ResourceClass::ALL {
        router = router.route(
            &format!("/{}", class.route_slug()),
            get(move |state: State<Arc<AppState>>| handle_class(state, class)),
        );
    }
    router
}

pub fn cors_layer(cfg: &AppConfig) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ORIGIN, CONTENT_TYPE])
        .expose_headers([CONTENT_LENGTH])
        .max_age(CORS_MAX_AGE);
    match cfg.cors_origins() {
        None => Ok(layer.allow_origin(Any)),
        Some(origins) => {
            let values = origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o)
                        .map_err(|_| AppError::Config(format!("invalid CORS origin '{o}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(layer.allow_origin(AllowOrigin::list(values)))
        }
    }
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn bind(cfg: &AppConfig) -> Result<TcpListener, AppError> {
    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|err| {
        AppError::Io(std::io::Error::new(
            err.kind(),
            format!("cannot bind {addr}: {err}"),
        ))
    })?;
    Ok(listener)
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "cost board listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("server shut down");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
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
    info!("received shutdown signal");
}
