//! HTTP interface.
//!
//! | method | path | body | response |
//! |---|---|---|---|
//! | `POST` | `/predict/{model_name}` | `{"features": [f64]}` | `{"prediction": i64}` |
//! | `POST` | `/recommended-events` | `{"user_id": str, "n": usize}` | `{"recommended_event_ids": [str]}` |
//! | `GET` | `/healthz` | | `ok` |
//! | `GET` | `/refresh-status` | | refresh status |
//!
//! Errors are returned as `{"detail": "<message>"}`.
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::recommender::{RecommendError, Recommender, DEFAULT_COUNT};
use crate::refresh::RefreshStatus;
use crate::registry::{ModelRegistry, RegistryError};

/// Every route served, as `(method, path)`.
pub const ROUTES: &[(&str, &str)] = &[
    ("POST", "/predict/{model_name}"),
    ("POST", "/recommended-events"),
    ("GET", "/healthz"),
    ("GET", "/refresh-status"),
];

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Named classifiers.
    pub registry: Arc<ModelRegistry>,
    /// Event recommender, possibly without assets.
    pub recommender: Arc<Recommender>,
    /// Status of the scheduled refresh, if enabled.
    pub refresh: Option<watch::Receiver<RefreshStatus>>,
}

impl AppState {
    /// State without a refresh status.
    pub fn new(registry: ModelRegistry, recommender: Recommender) -> Self {
        AppState {
            registry: Arc::new(registry),
            recommender: Arc::new(recommender),
            refresh: None,
        }
    }

    /// Report the refresh status from `status`.
    pub fn with_refresh(mut self, status: watch::Receiver<RefreshStatus>) -> Self {
        self.refresh = Some(status);
        self
    }
}

/// Body of `POST /predict/{model_name}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// One sample's features, in training column order.
    pub features: Vec<f64>,
}

/// Response of `POST /predict/{model_name}`.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Predicted label.
    pub prediction: i64,
}

/// Body of `POST /recommended-events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationRequest {
    /// External user identifier.
    pub user_id: String,
    /// Number of events to return.
    #[serde(default = "default_count")]
    pub n: usize,
}

fn default_count() -> usize {
    DEFAULT_COUNT
}

/// Response of `POST /recommended-events`.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    /// External event identifiers, best first.
    pub recommended_event_ids: Vec<String>,
}

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    /// Model registry failure.
    Registry(RegistryError),
    /// Recommender failure.
    Recommend(RecommendError),
    /// Anything else, such as a failed blocking task.
    Internal(String),
}

impl ApiError {
    /// HTTP status: 404 for unknown models and users, otherwise 500.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(RegistryError::ModelNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Recommend(RecommendError::UserNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned in the `detail` field.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Registry(err) => err.to_string(),
            ApiError::Recommend(err) => err.to_string(),
            ApiError::Internal(message) => message.clone(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Registry(err)
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        ApiError::Recommend(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail() });

        (self.status(), Json(body)).into_response()
    }
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict/{model_name}", post(predict_handler))
        .route("/recommended-events", post(recommend_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/refresh-status", get(refresh_status_handler))
        .with_state(state)
}

async fn predict_handler(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let prediction = state
        .registry
        .predict(&model_name, &request.features)
        .map_err(|err| {
            warn!(model = %model_name, error = %err, "Prediction request failed");
            err
        })?;

    Ok(Json(PredictionResponse { prediction }))
}

async fn recommend_handler(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let recommender = state.recommender.clone();
    let RecommendationRequest { user_id, n } = request;

    // Scoring every item is CPU bound.
    let recommended_event_ids =
        tokio::task::spawn_blocking(move || recommender.recommend(&user_id, n))
            .await
            .map_err(|e| ApiError::Internal(format!("Recommendation task failed: {}", e)))??;

    Ok(Json(RecommendationResponse {
        recommended_event_ids,
    }))
}

async fn refresh_status_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = match state.refresh {
        Some(ref status) => {
            let current = status.borrow().clone();
            serde_json::to_value(&current).map_err(|e| ApiError::Internal(e.to_string()))?
        }
        None => serde_json::json!({ "state": "disabled" }),
    };

    Ok(Json(body))
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<(), failure::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;

    for (method, path) in ROUTES {
        info!(method = %method, path = %path, "Route registered");
    }
    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
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
                warn!(error = %err, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use ndarray::{arr1, arr2};
    use tower::ServiceExt;

    use super::*;
    use crate::data::{Dataset, Features, IdMapping};
    use crate::models::linear::LogisticRegression;
    use crate::models::scaler::StandardScaler;
    use crate::recommender::RecommenderAssets;
    use crate::registry::ModelEntry;
    use crate::{ItemId, PredictionError, RankingModel, UserId};

    struct FixedScores(Vec<f32>);

    impl RankingModel for FixedScores {
        fn predict(
            &self,
            _: UserId,
            item_ids: &[ItemId],
            _: &Features,
            _: &Features,
        ) -> Result<Vec<f32>, PredictionError> {
            Ok(item_ids.iter().map(|&idx| self.0[idx]).collect())
        }
    }

    fn mapping(ids: &[&str]) -> IdMapping {
        IdMapping::new(
            ids.iter()
                .enumerate()
                .map(|(idx, id)| (id.to_string(), idx))
                .collect::<HashMap<_, _>>(),
        )
        .unwrap()
    }

    fn registry() -> ModelRegistry {
        let model = LogisticRegression::new(arr2(&[[1.0, 1.0]]), arr1(&[-5.0]), vec![0, 1]).unwrap();
        let scaler = StandardScaler::new(None, Some(arr1(&[2.0, 2.0]))).unwrap();

        ModelRegistry::new().with_model("fraud", ModelEntry::new(model).with_scaler(scaler))
    }

    fn recommender() -> Recommender {
        let dataset = Dataset::new(mapping(&["a", "b", "c"]), mapping(&["w", "x", "y", "z"]));
        let assets = RecommenderAssets::new(
            FixedScores(vec![0.1, 0.9, 0.4, 0.2]),
            dataset,
            Features::eye(3),
            Features::eye(4),
        )
        .unwrap();

        Recommender::from(assets)
    }

    fn app() -> Router {
        router(AppState::new(registry(), recommender()))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn predicts_with_scaled_features() {
        let (status, body) = call(app(), "POST", "/predict/fraud", Some(r#"{"features": [12, 4]}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"prediction": 1}));

        let (status, body) = call(app(), "POST", "/predict/fraud", Some(r#"{"features": [6, 2]}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"prediction": 0}));
    }

    #[tokio::test]
    async fn unknown_model_is_404() {
        let (status, body) = call(app(), "POST", "/predict/churn", Some(r#"{"features": [1]}"#)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body), serde_json::json!({"detail": "Model \"churn\" not found"}));
    }

    #[tokio::test]
    async fn wrong_dimensionality_is_500() {
        let (status, body) = call(app(), "POST", "/predict/fraud", Some(r#"{"features": [1, 2, 3]}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json(&body)["detail"].as_str().unwrap().contains("Expected 2 features, got 3"));
    }

    #[tokio::test]
    async fn recommends_top_events() {
        let (status, body) = call(
            app(),
            "POST",
            "/recommended-events",
            Some(r#"{"user_id": "b", "n": 2}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&body),
            serde_json::json!({"recommended_event_ids": ["x", "y"]})
        );
    }

    #[tokio::test]
    async fn count_defaults_to_five() {
        let (status, body) = call(app(), "POST", "/recommended-events", Some(r#"{"user_id": "a"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        let response: RecommendationResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.recommended_event_ids, vec!["x", "y", "z", "w"]);
    }

    #[tokio::test]
    async fn unknown_user_is_404() {
        let (status, body) = call(
            app(),
            "POST",
            "/recommended-events",
            Some(r#"{"user_id": "nobody", "n": 3}"#),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json(&body),
            serde_json::json!({"detail": "User ID 'nobody' not found in training data."})
        );
    }

    #[tokio::test]
    async fn missing_recommender_is_500() {
        let app = router(AppState::new(registry(), Recommender::empty()));
        let (status, body) = call(app, "POST", "/recommended-events", Some(r#"{"user_id": "a"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json(&body),
            serde_json::json!({"detail": "Model components are missing."})
        );
    }

    #[tokio::test]
    async fn health_and_refresh_status() {
        let (status, body) = call(app(), "GET", "/healthz", None).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

        let (status, body) = call(app(), "GET", "/refresh-status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"state": "disabled"}));

        let (_tx, rx) = watch::channel(RefreshStatus::Succeeded { elapsed_ms: 12 });
        let app = router(AppState::new(registry(), recommender()).with_refresh(rx));

        let (status, body) = call(app, "GET", "/refresh-status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&body),
            serde_json::json!({"state": "succeeded", "elapsed_ms": 12})
        );
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let state = AppState::new(registry(), recommender());

        serve("127.0.0.1:0".parse().unwrap(), state, async {})
            .await
            .unwrap();
    }
}
