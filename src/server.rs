//! HTTP surface: the form page, random fill, submissions and a JSON API.

use crate::dataset::Dataset;
use crate::error::PredictError;
use crate::form::{random_fill, FormRenderer};
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::models::inference::{InferenceEngine, Regressor};
use crate::models::loader::check_category_universe;
use crate::predictor::Predictor;
use crate::schema::{FeatureEncoder, FeatureKind, FeatureSchema};
use crate::session::{SessionState, SessionStore};
use crate::types::{Banner, FeatureValue};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "rep_session";

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub predictor: Arc<Predictor>,
    pub renderer: Arc<FormRenderer>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Wire the loaded artifacts into request-handling components
    pub fn build(
        dataset: Arc<Dataset>,
        model: Arc<dyn Regressor>,
        sessions: Arc<SessionStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self> {
        let schema = Arc::new(FeatureSchema::from_dataset(&dataset)?);
        check_category_universe(&schema, &dataset, model.as_ref());

        let encoder = FeatureEncoder::new(&schema, dataset.category_universe(), model.feature_names())
            .context("Model inputs do not match the dataset columns")?;
        info!(
            model = %model.name(),
            inputs = ?encoder.input_names(),
            "Feature encoder ready"
        );

        let engine = InferenceEngine::new(model, encoder, metrics.clone());
        let predictor = Predictor::new(schema, engine, metrics.clone());
        let renderer = FormRenderer::new().context("Failed to compile page template")?;

        Ok(Self {
            dataset,
            predictor: Arc::new(predictor),
            renderer: Arc::new(renderer),
            sessions,
            metrics,
        })
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/random", post(random))
        .route("/predict", post(predict))
        .route("/api/predict", post(api_predict))
        .route("/api/schema", get(api_schema))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

fn session_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

fn with_session_cookie(mut response: Response, id: Uuid, created: bool) -> Response {
    if created {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

fn render_page(state: &AppState, session: Option<&SessionState>, banner: Option<Banner>) -> Response {
    let view = state
        .renderer
        .build_view(state.predictor.schema(), session, banner);

    match state.renderer.render(&view) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

/// Sessions are only created by requests that stash values
async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.metrics.record_page_view();
    let session = session_from_headers(&headers).and_then(|id| state.sessions.touch(&id));
    render_page(&state, session.as_ref(), None)
}

async fn random(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, created) = state.sessions.resolve(session_from_headers(&headers));
    state.metrics.record_random_fill();

    let record = {
        let mut rng = rand::thread_rng();
        random_fill(&state.dataset, state.predictor.schema(), &mut rng)
    };
    match record {
        Some(record) => {
            state.sessions.update(&session, |s| s.replace(&record));
        }
        None => warn!("Random fill requested on an empty dataset"),
    }

    with_session_cookie(Redirect::to("/").into_response(), session, created)
}

async fn predict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (session, created) = state.sessions.resolve(session_from_headers(&headers));

    let (record, outcome) = state.predictor.predict_form(&form);
    if let Some(record) = &record {
        state.sessions.update(&session, |s| s.stash(record));
    }

    let banner = Banner::from_outcome(&outcome);
    let session_state = state.sessions.get(&session);
    with_session_cookie(
        render_page(&state, session_state.as_ref(), Some(banner)),
        session,
        created,
    )
}

/// JSON prediction request
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub features: HashMap<String, FeatureValue>,
}

/// JSON prediction response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: f64,
    pub formatted: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

async fn api_predict(State(state): State<AppState>, Json(request): Json<PredictRequest>) -> Response {
    let outcome = state
        .predictor
        .collect_values(&request.features)
        .and_then(|record| state.predictor.predict(&record));

    match outcome {
        Ok(prediction) => Json(PredictResponse {
            prediction: prediction.value,
            formatted: prediction.formatted(),
            timestamp: prediction.timestamp,
        })
        .into_response(),
        Err(e) => {
            let status = match e {
                PredictError::Validation { .. } | PredictError::Encoding(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = ErrorResponse {
                error: e.kind(),
                message: e.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

/// Form schema as exposed by `/api/schema`
#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub categorical: Vec<CategoricalField>,
    pub numeric: Vec<String>,
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct CategoricalField {
    pub name: String,
    pub choices: Vec<&'static str>,
    /// Categories observed in the reference dataset, in encoding order
    pub observed: Vec<String>,
}

async fn api_schema(State(state): State<AppState>) -> Json<SchemaResponse> {
    let schema = state.predictor.schema();
    let universe = state.predictor.engine().encoder().universe();

    let categorical = schema
        .categorical()
        .filter_map(|spec| match spec.kind {
            FeatureKind::Categorical(choices) => Some(CategoricalField {
                name: spec.name.clone(),
                choices: choices.to_vec(),
                observed: universe
                    .categories(&spec.name)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
            }),
            FeatureKind::Numeric => None,
        })
        .collect();

    Json(SchemaResponse {
        categorical,
        numeric: schema.numeric().map(|f| f.name.clone()).collect(),
        target: state.dataset.target_column().to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub features: usize,
    pub rows: usize,
    pub sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model: state.predictor.engine().model_name().to_string(),
        features: state.predictor.schema().feature_count(),
        rows: state.dataset.len(),
        sessions: state.sessions.len(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
