use crate::{
    app::{App, AppError},
    eid::Eid,
    records::{AnimalCreate, AnimalRecord},
    semantic::{SearchRequest, SimilarAnimal},
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

#[derive(Clone)]
pub struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/animals/search", post(search))
        .route("/api/animals/create", post(create))
        .route("/api/animals/:id", get(get_animal))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: App) -> anyhow::Result<()> {
    let app = Arc::new(app);
    app.run_dispatcher();

    let listen_addr = app.config().listen_addr.clone();
    let signal = shutdown_signal(app.clone());

    async fn shutdown_signal(app: Arc<App>) {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
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

        // join on dispatcher thread
        tokio::task::block_in_place(|| app.shutdown());
    }

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(signal)
        .await?;

    Ok(())
}

pub fn start_daemon(app: App) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(app).await })
}

#[derive(Debug)]
pub struct HttpError(AppError);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Base64(_) => {
                axum::http::StatusCode::BAD_REQUEST
            }
            AppError::Search(err) if err.is_client_error() => axum::http::StatusCode::BAD_REQUEST,
            AppError::Search(_)
            | AppError::Store(_)
            | AppError::IO(_)
            | AppError::Other(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| HttpError(AppError::BadRequest(rejection.body_text())))
}

async fn search(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SimilarAnimal>>, HttpError> {
    let payload = json_body(payload)?;
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        app.search(&payload).map(Into::into).map_err(Into::into)
    })
}

#[derive(Deserialize, Serialize)]
pub struct AnimalCreateRequest {
    /// Photo to store before the record is created.
    #[serde(default)]
    pub image_b64: Option<String>,

    #[serde(flatten)]
    pub animal: AnimalCreate,
}

impl Debug for AnimalCreateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AnimalCreateRequest {{ image_b64: [REDACTED], animal: {:?} }}",
            self.animal
        )
    }
}

async fn create(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<AnimalCreateRequest>, JsonRejection>,
) -> Result<Json<AnimalRecord>, HttpError> {
    let payload = json_body(payload)?;
    log::debug!("payload: {payload:?}");

    let photo = payload
        .image_b64
        .map(|image| STANDARD.decode(image.trim()))
        .transpose()?;

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        app.create(payload.animal, photo)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn get_animal(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Json<AnimalRecord>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        app.get(&Eid::from(id)).map(Into::into).map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub records: usize,
    pub vectored: usize,
}

async fn health(State(state): State<Arc<SharedState>>) -> Result<Json<HealthResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let (records, vectored) = app.stats()?;
        Ok(HealthResponse {
            status: "ok".to_string(),
            records,
            vectored,
        }
        .into())
    })
}
