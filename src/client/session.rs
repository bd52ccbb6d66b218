//! Editor-side session lifecycle.
//!
//! One session per chat: `ensure_session` creates or reuses it (in-flight
//! calls for the same chat share one request), heartbeats keep the lease
//! alive, a 4-second refresh keeps status current, and both timers pause
//! while the page is hidden. A visibility change back to foreground
//! heartbeats and refreshes immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use hyper::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::api::RuntimeApi;
use super::preview::PreviewInputs;
use crate::error::RuntimeError;
use crate::session::DeploymentState;
use crate::session::Session;
use crate::single_flight::SingleFlight;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct SessionClientOptions {
    /// False when the deployment runs the legacy in-browser provider;
    /// every call becomes a no-op then.
    pub remote_enabled: bool,
    pub heartbeat_interval: Duration,
    pub refresh_interval: Duration,
}

impl Default for SessionClientOptions {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Creating,
    Connected,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub chat_id: Option<String>,
    pub runtime_token: Option<String>,
    pub session: Option<Session>,
    pub deployment_status: Option<DeploymentState>,
    pub expires_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureSessionOptions {
    pub chat_id: Option<String>,
    pub template_id: Option<String>,
    pub force: bool,
}

struct ClientInner {
    api: Arc<dyn RuntimeApi>,
    options: SessionClientOptions,
    state: RwLock<SessionSnapshot>,
    ensure_flights: SingleFlight<SessionSnapshot>,
    visible: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
    timers_started: AtomicBool,
}

#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    pub fn new(api: Arc<dyn RuntimeApi>, options: SessionClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                api,
                options,
                state: RwLock::new(SessionSnapshot::default()),
                ensure_flights: SingleFlight::new(),
                visible: AtomicBool::new(true),
                timers: Mutex::new(Vec::new()),
                timers_started: AtomicBool::new(false),
            }),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.read().await.clone()
    }

    /// Inputs for the preview projector, derived from current state.
    pub async fn preview_inputs(&self) -> PreviewInputs {
        let state = self.inner.state.read().await;
        PreviewInputs {
            chat_id: state.chat_id.clone(),
            compose_id: state.session.as_ref().map(|s| s.compose_id.clone()),
            runtime_token: state.runtime_token.clone(),
            preview_url: state.session.as_ref().map(|s| s.preview_url.clone()),
            session_status: state.session.as_ref().map(|s| s.status),
            deployment_status: state.deployment_status,
            transient_error: state.connection == ConnectionState::Error,
        }
    }

    /// Create or reuse the session for a chat. Explicit chat id wins, then
    /// the currently-bound chat, then a fresh draft id.
    pub async fn ensure_session(
        &self,
        options: EnsureSessionOptions,
    ) -> Result<Option<SessionSnapshot>, RuntimeError> {
        let inner = &self.inner;
        if !inner.options.remote_enabled {
            return Ok(None);
        }

        let (current_chat, current_token) = {
            let state = inner.state.read().await;
            (state.chat_id.clone(), state.runtime_token.clone())
        };
        let chat_id = options
            .chat_id
            .or_else(|| current_chat.clone())
            .unwrap_or_else(|| format!("draft-{}", uuid::Uuid::new_v4()));

        if !options.force
            && current_chat.as_deref() == Some(chat_id.as_str())
            && current_token.is_some()
        {
            let state = inner.state.read().await;
            if state.connection == ConnectionState::Connected {
                return Ok(Some(state.clone()));
            }
        }

        // Chat switch: the previous session dies with its chat.
        if let (Some(previous_chat), Some(previous_token)) = (&current_chat, &current_token) {
            if previous_chat != &chat_id {
                if let Err(e) = inner.api.delete_session(previous_token).await {
                    tracing::warn!(
                        chat_id = %previous_chat,
                        error = %e,
                        "failed to tear down previous chat session"
                    );
                }
                *inner.state.write().await = SessionSnapshot::default();
            }
        }

        {
            let mut state = inner.state.write().await;
            state.connection = ConnectionState::Creating;
            state.chat_id = Some(chat_id.clone());
            state.last_error = None;
        }

        let api = Arc::clone(&inner.api);
        let template_id = options.template_id.clone();
        let flight_chat = chat_id.clone();
        let result = inner
            .ensure_flights
            .run(&chat_id, move || async move {
                let response = api
                    .create_session(&flight_chat, template_id.as_deref())
                    .await?;
                Ok(SessionSnapshot {
                    connection: ConnectionState::Connected,
                    chat_id: Some(flight_chat),
                    runtime_token: Some(response.runtime_token),
                    deployment_status: Some(response.deployment_status),
                    expires_at: Some(response.session.expires_at),
                    session: Some(response.session),
                    last_error: None,
                })
            })
            .await;

        match result {
            Ok(snapshot) => {
                *inner.state.write().await = snapshot.clone();
                start_timers(inner);
                Ok(Some(snapshot))
            }
            Err(e) => {
                let mut state = inner.state.write().await;
                state.connection = ConnectionState::Error;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Poll the session status. A 401 means the lease is gone: reset.
    pub async fn refresh_session(&self) -> Result<(), RuntimeError> {
        self.inner.refresh_session().await
    }

    /// Slide the lease. The server may rotate the token; absorb it.
    pub async fn heartbeat(&self) -> Result<(), RuntimeError> {
        self.inner.heartbeat().await
    }

    /// Explicit teardown: delete the remote session and reset.
    pub async fn teardown_session(&self) -> Result<(), RuntimeError> {
        self.inner.stop_timers().await;
        let token = { self.inner.state.write().await.runtime_token.take() };
        *self.inner.state.write().await = SessionSnapshot::default();
        if let Some(token) = token {
            self.inner.api.delete_session(&token).await?;
        }
        Ok(())
    }

    /// Page-unload analog: stop timers and fire a best-effort delete
    /// without waiting on it.
    pub async fn close(&self) {
        self.inner.stop_timers().await;
        let token = { self.inner.state.write().await.runtime_token.take() };
        *self.inner.state.write().await = SessionSnapshot::default();
        if let Some(token) = token {
            let api = Arc::clone(&self.inner.api);
            tokio::spawn(async move {
                if let Err(e) = api.delete_session(&token).await {
                    tracing::debug!(error = %e, "unload teardown failed");
                }
            });
        }
    }

    /// Visibility change. Foregrounding heartbeats and refreshes right
    /// away; background ticks are skipped by the timer loops.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::SeqCst);
        if visible {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if inner.heartbeat().await.is_ok() {
                    let _ = inner.refresh_session().await;
                }
            });
        }
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }
}

impl ClientInner {
    async fn refresh_session(&self) -> Result<(), RuntimeError> {
        let token = { self.state.read().await.runtime_token.clone() };
        let Some(token) = token else {
            return Ok(());
        };
        match self.api.get_session(&token).await {
            Ok(response) => {
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Connected;
                state.deployment_status = Some(response.deployment_status);
                state.expires_at = Some(response.session.expires_at);
                state.session = Some(response.session);
                state.last_error = None;
                Ok(())
            }
            Err(e) if e.status == StatusCode::UNAUTHORIZED => {
                tracing::info!("runtime token no longer valid, resetting session state");
                *self.state.write().await = SessionSnapshot::default();
                Err(e)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Error;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn heartbeat(&self) -> Result<(), RuntimeError> {
        let token = { self.state.read().await.runtime_token.clone() };
        let Some(token) = token else {
            return Ok(());
        };
        match self.api.heartbeat(&token).await {
            Ok(response) => {
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Connected;
                state.expires_at = Some(response.expires_at);
                if let Some(session) = &mut state.session {
                    session.status = response.status;
                    session.expires_at = response.expires_at;
                }
                if let Some(token) = response.runtime_token {
                    state.runtime_token = Some(token);
                }
                state.last_error = None;
                Ok(())
            }
            Err(e) if e.status == StatusCode::UNAUTHORIZED => {
                *self.state.write().await = SessionSnapshot::default();
                Err(e)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Error;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn stop_timers(&self) {
        for task in self.timers.lock().await.drain(..) {
            task.abort();
        }
        self.timers_started.store(false, Ordering::SeqCst);
    }
}

/// Start the heartbeat and refresh loops once, after the first successful
/// session create.
fn start_timers(inner: &Arc<ClientInner>) {
    if inner.timers_started.swap(true, Ordering::SeqCst) {
        return;
    }

    let heartbeat = spawn_tick_loop(
        Arc::downgrade(inner),
        inner.options.heartbeat_interval,
        |inner| async move {
            if let Err(e) = inner.heartbeat().await {
                tracing::debug!(error = %e, "heartbeat tick failed");
            }
        },
    );
    let refresh = spawn_tick_loop(
        Arc::downgrade(inner),
        inner.options.refresh_interval,
        |inner| async move {
            if let Err(e) = inner.refresh_session().await {
                tracing::debug!(error = %e, "refresh tick failed");
            }
        },
    );

    let registry = Arc::clone(inner);
    tokio::spawn(async move {
        registry.timers.lock().await.extend([heartbeat, refresh]);
    });
}

fn spawn_tick_loop<F, Fut>(inner: Weak<ClientInner>, interval: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<ClientInner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            // Hidden pages skip ticks entirely; set_visible(true) fires an
            // immediate heartbeat+refresh instead.
            if !inner.visible.load(Ordering::SeqCst) {
                continue;
            }
            if inner.state.read().await.runtime_token.is_none() {
                continue;
            }
            tick(inner).await;
        }
    })
}
