use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::completion::{CompletionClient, RetryNotice, RetryObserver};
use crate::controller::{ChatController, DisplaySink, Reply};
use crate::sentiment;
use crate::session::{Message, SessionArchive, SessionRecord};
use crate::settings::{SessionSettings, SessionSettingsPatch, SettingsLayers};
use crate::store::SessionStore;

const INDEX_HTML: &str = include_str!("assets/index.html");
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// One live chat and the last time a request touched it.
pub struct LiveSession {
    controller: Mutex<ChatController>,
    last_active: StdMutex<Instant>,
}

impl LiveSession {
    fn new(controller: ChatController) -> Self {
        Self {
            controller: Mutex::new(controller),
            last_active: StdMutex::new(Instant::now()),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ChatController> {
        self.touch();
        self.controller.lock().await
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_busy(&self) -> bool {
        self.controller.try_lock().is_err()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<LiveSession>>>>,
    pub client: CompletionClient,
    pub layers: Arc<SettingsLayers>,
    pub store: Arc<SessionStore>,
    pub shutdown: CancellationToken,
    pub idle_timeout: Duration,
}

impl AppState {
    pub fn new(client: CompletionClient, layers: SettingsLayers, store: SessionStore) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            sessions: Arc::default(),
            client: client.with_cancellation(shutdown.clone()),
            layers: Arc::new(layers),
            store: Arc::new(store),
            shutdown,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    async fn session(&self, id: Uuid) -> Result<Arc<LiveSession>, StatusCode> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StatusCode::NOT_FOUND)
    }

    /// Drops sessions nobody has used for `idle_timeout`. A session with a
    /// submit in flight is never dropped. Returns how many were removed.
    pub async fn expire_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let idle = now.saturating_duration_since(session.last_active());
            let keep = idle < self.idle_timeout || session.is_busy();
            if !keep {
                info!(%id, idle_secs = idle.as_secs(), "idle session expired");
            }
            keep
        });
        before - sessions.len()
    }

    /// Periodically expires idle sessions until shutdown.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let state = self.clone();
        let period = (self.idle_timeout / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        state.expire_idle().await;
                    }
                }
            }
        })
    }
}

/// Collects retry notices so they can be returned with the reply.
#[derive(Default)]
struct RequestSink {
    notices: StdMutex<Vec<String>>,
}

impl RequestSink {
    fn into_notices(self) -> Vec<String> {
        self.notices
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RetryObserver for RequestSink {
    fn retrying(&self, n: &RetryNotice) {
        let text = format!(
            "Just a minute... the server is busy. Retrying your question ({}/{})",
            n.attempt + 1,
            n.max_attempts
        );
        self.notices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(text);
    }
}

impl DisplaySink for RequestSink {}

/// Initial per-session settings, e.g. `{"system_prompt": "..."}`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(flatten)]
    pub settings: SessionSettings,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Json<CreateSessionResponse> {
    let controller = ChatController::new(state.client.clone(), state.layers.clone(), body.settings);
    let id = Uuid::new_v4();
    state
        .sessions
        .write()
        .await
        .insert(id, Arc::new(LiveSession::new(controller)));
    info!(%id, "session started");
    Json(CreateSessionResponse { id })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Uuid>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.sessions.read().await;
    Json(ListSessionsResponse {
        sessions: sessions.keys().copied().collect(),
    })
}

async fn end_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(%id, "session ended");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, StatusCode> {
    let session = state.session(id).await?;
    let messages = session.lock().await.snapshot();
    Ok(Json(MessagesResponse { messages }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplyBody {
    Text { text: String },
    Error { text: String },
}

impl From<&Reply> for ReplyBody {
    fn from(r: &Reply) -> Self {
        match r {
            Reply::Text(text) => ReplyBody::Text { text: text.clone() },
            Reply::Failed(_) => ReplyBody::Error { text: r.render() },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub reply: Option<ReplyBody>,
    pub notices: Vec<String>,
    pub messages: Vec<Message>,
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let session = state.session(id).await?;
    // One request in flight per session; later submits queue on this lock.
    let mut controller = session.lock().await;
    let sink = RequestSink::default();
    let reply = controller.submit(&body.text, &sink).await;
    Ok(Json(SubmitResponse {
        reply: reply.as_ref().map(ReplyBody::from),
        notices: sink.into_notices(),
        messages: controller.snapshot(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSettingsResponse {
    pub settings: SessionSettings,
    /// The prompt actually sent, after falling back to process defaults.
    pub effective_system_prompt: Option<String>,
}

impl SessionSettingsResponse {
    fn new(settings: &SessionSettings, layers: &SettingsLayers) -> Self {
        Self {
            settings: settings.clone(),
            effective_system_prompt: layers.resolve(settings).system_prompt,
        }
    }
}

async fn get_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSettingsResponse>, StatusCode> {
    let session = state.session(id).await?;
    let controller = session.lock().await;
    Ok(Json(SessionSettingsResponse::new(
        controller.settings(),
        &state.layers,
    )))
}

async fn patch_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionSettingsPatch>,
) -> Result<Json<SessionSettingsResponse>, StatusCode> {
    let session = state.session(id).await?;
    let mut controller = session.lock().await;
    controller.settings_mut().apply_patch(patch);
    Ok(Json(SessionSettingsResponse::new(
        controller.settings(),
        &state.layers,
    )))
}

async fn save_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionRecord>, StatusCode> {
    let session = state.session(id).await?;
    let messages = session.lock().await.snapshot();
    let store = state.store.clone();
    let record = tokio::task::spawn_blocking(move || store.save(messages))
        .await
        .map_err(|e| {
            error!(error = %e, "save task panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!(error = %e, "saving session failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(record))
}

async fn get_archive(State(state): State<AppState>) -> Result<Json<SessionArchive>, StatusCode> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "loading archive failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
pub struct SentimentBody {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentimentResponse {
    pub score: f64,
}

async fn score_sentiment(Json(body): Json<SentimentBody>) -> Json<SentimentResponse> {
    Json(SentimentResponse {
        score: sentiment::score(&body.text),
    })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", delete(end_session))
        .route(
            "/v1/sessions/:id/messages",
            get(get_messages).post(post_message),
        )
        .route(
            "/v1/sessions/:id/settings",
            get(get_session_settings).patch(patch_session_settings),
        )
        .route("/v1/sessions/:id/save", post(save_session))
        .route("/v1/archive", get(get_archive))
        .route("/v1/sentiment", post(score_sentiment))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let sweeper = state.spawn_idle_sweeper();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "chat server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    let _ = sweeper.await;
    Ok(())
}
