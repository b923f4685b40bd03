//! Gateway HTTP server (single port).

use crate::channels::{parse_webhook_event, GraphMessenger, InboundEvent};
use crate::config::{self, Config, GatewayConfig};
use crate::conversation::SarufiClient;
use crate::dispatch::{DispatchOptions, Dispatcher};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const INVALID_TOKEN_BODY: &str = "Invalid verification token";

/// Shared state for the webhook handlers.
#[derive(Clone)]
struct GatewayState {
    /// Expected `hub.verify_token`.
    verify_token: Arc<str>,
    /// Port actually bound (reported by /health).
    port: u16,
    /// Queue drained by the dispatch processor.
    dispatch_tx: mpsc::Sender<InboundEvent>,
}

/// Run the webhook server from config: resolve credentials, select the Sarufi bot,
/// bind `gateway.bind:gateway.port`, and serve until SIGINT/SIGTERM.
/// Missing credentials or a failed bot selection abort startup.
pub async fn run_gateway(config: Config) -> Result<()> {
    let creds = config::resolve_credentials(&config)?;

    let messenger = GraphMessenger::new(
        &config.messenger.graph_base_url,
        &config.messenger.api_version,
        creds.page_access_token.clone(),
        Duration::from_secs(config.messenger.timeout_secs),
    )
    .context("building messenger client")?;
    log::debug!("messenger send api: {}", messenger.endpoint());

    let sarufi = SarufiClient::new(
        Some(config.sarufi.base_url.clone()),
        creds.sarufi_api_key.clone(),
        Duration::from_secs(config.sarufi.timeout_secs),
    )
    .context("building sarufi client")?;
    let bot = sarufi
        .get_bot(&creds.sarufi_bot_id)
        .await
        .with_context(|| format!("selecting sarufi bot {}", creds.sarufi_bot_id))?;
    log::info!("using sarufi bot {} (id {})", bot.name(), bot.id());

    let dispatcher = Dispatcher::new(
        Arc::new(bot),
        Arc::new(messenger),
        DispatchOptions {
            channel: config.sarufi.channel.clone(),
            typing_indicator: config.messenger.typing_indicator,
            batch_images: config.messenger.batch_images,
        },
    );

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("webhook listening on {}", bind_addr);

    serve(
        listener,
        &config.gateway,
        creds.verify_token,
        dispatcher,
        shutdown_signal(),
    )
    .await
}

/// Serve the webhook on an already bound listener until `shutdown` completes, then
/// wait for queued and in-flight dispatch units to finish.
pub async fn serve<F>(
    listener: TcpListener,
    gateway: &GatewayConfig,
    verify_token: String,
    dispatcher: Dispatcher,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = listener.local_addr().context("reading local address")?.port();
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<InboundEvent>(gateway.queue_capacity.max(1));
    let processor = tokio::spawn(run_dispatch_processor(dispatcher, dispatch_rx));

    let state = GatewayState {
        verify_token: Arc::from(verify_token),
        port,
        dispatch_tx,
    };
    let app = Router::new()
        .route("/", get(verify_webhook).post(receive_webhook))
        .route("/health", get(health_http))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited")?;

    // The router (and every queue sender) is gone; the processor drains and exits.
    log::info!("http stopped, waiting for in-flight dispatches");
    if let Err(e) = processor.await {
        log::error!("dispatch processor failed: {}", e);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Receive queued events and run each as its own task. Units are independent and
/// unordered. Returns once the queue is closed and all units have finished.
async fn run_dispatch_processor(dispatcher: Dispatcher, mut rx: mpsc::Receiver<InboundEvent>) {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(event) => {
                    let dispatcher = dispatcher.clone();
                    inflight.spawn(async move {
                        dispatcher.handle(&event).await;
                    });
                }
                None => break,
            },
            Some(res) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = res {
                    log::error!("dispatch task failed: {}", e);
                }
            }
        }
    }
    while let Some(res) = inflight.join_next().await {
        if let Err(e) = res {
            log::error!("dispatch task failed: {}", e);
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
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
    log::info!("shutdown signal received, draining");
}

/// GET / answers the subscription handshake. Echoes `hub.challenge` when `hub.verify_token` matches.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let provided = params.get("hub.verify_token").map(String::as_str);
    if provided == Some(&*state.verify_token) {
        log::info!("webhook verified");
        let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
        return (StatusCode::OK, challenge).into_response();
    }
    log::error!("webhook verification failed");
    (StatusCode::FORBIDDEN, INVALID_TOKEN_BODY).into_response()
}

/// POST / receives event deliveries. Always acknowledged with 200 "ok"; the event (if any) is queued.
async fn receive_webhook(State(state): State<GatewayState>, body: Bytes) -> &'static str {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("webhook body is not json: {}", e);
            return "ok";
        }
    };
    log::debug!("received webhook data: {}", payload);
    match parse_webhook_event(&payload) {
        Some(event) => {
            if let Err(e) = state.dispatch_tx.try_send(event) {
                log::warn!("dispatch queue unavailable, dropping event: {}", e);
            }
        }
        None => log::debug!("webhook carried no message text or postback"),
    }
    "ok"
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}
