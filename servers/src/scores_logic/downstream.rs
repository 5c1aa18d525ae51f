use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use lib_scores::FeedKey;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::scores_logic::config::Settings;
use crate::scores_logic::state::AppState;

pub async fn run(
    settings: Settings,
    app_state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    log::info!("Downstream server listening on {}", addr);

    if let (Some(cert_path), Some(key_path)) = (&settings.tls_cert_path, &settings.tls_key_path) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await?;
    }

    Ok(())
}

fn router(app_state: AppState) -> Router {
    // Score widgets embed this feed from arbitrary origins, so CORS
    // is wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/live_scores", get(live_scores_handler))
        .route("/api/player_stats/{id}", get(player_stats_handler))
        .route("/api/team_rankings", get(team_rankings_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn live_scores_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    serve_feed(state, peer, FeedKey::LiveScores).await
}

async fn player_stats_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> Response {
    serve_feed(state, peer, FeedKey::PlayerStats(id)).await
}

async fn team_rankings_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    serve_feed(state, peer, FeedKey::TeamRankings).await
}

async fn serve_feed(state: AppState, peer: SocketAddr, key: FeedKey) -> Response {
    if !state.limiter.admit(&peer.ip().to_string()).await {
        // Routine client-side outcome, never an error-level event.
        log::debug!("Rate limited {} on {}", peer.ip(), key);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests." })),
        )
            .into_response();
    }

    match state.fetch_feed(key.clone()).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            log::error!("Provider failure serving {}: {}", key, err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    // Subscribing counts against the same per-client budget as pull
    // requests; a throttled client gets a policy-violation close.
    if !state.limiter.admit(&peer.ip().to_string()).await {
        log::debug!("Rate limited {} at subscribe", peer.ip());
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Too many requests.".into(),
            })))
            .await;
        return;
    }

    let (client_id, mut frames) = state.registry.register().await;
    log::info!("Client {} connected from {}", client_id, peer);

    loop {
        tokio::select! {
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is one-way; pings are answered by axum and
                    // anything else from the client is ignored.
                    Some(Ok(_)) => {}
                }
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    // The registry dropped this connection after a failed
                    // delivery; terminal, the client must resubscribe.
                    None => break,
                }
            }
        }
    }

    state.registry.unregister(client_id).await;
    log::info!("Client {} disconnected", client_id);
}
