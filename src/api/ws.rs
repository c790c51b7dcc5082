// =============================================================================
// Push channel — persistent bidirectional connection (C8/C11, spec.md §4.5,
// §6)
// =============================================================================
//
// Handshake carries a bearer credential as `?token=`. Client -> server
// frames: `{type: "subscribe", topic, session_id?}`,
// `{type: "unsubscribe", topic}`, `{type: "ping"}`. `session_id` on a
// subscribe to order_update/portfolio_update restricts that topic to one
// session's events for this connection.
// Server -> client frames: `{type: "market_snapshot"|"market_update"|
// "order_update"|"portfolio_update"|"chat"|"pong"|"error", ...}`. All frames
// are UTF-8 JSON.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::Application;
use crate::auth::Identity;
use crate::broadcaster::{Connection, Topic};
use crate::user_store::Role;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Application>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    let identity = match app.auth.resolve(&token) {
        Ok(identity) => identity,
        Err(_) => {
            warn!("push channel rejected: credential did not resolve");
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "missing or invalid bearer credential",
            )
                .into_response();
        }
    };

    info!(user = %identity.user_id, "push channel handshake accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, app, identity))
        .into_response()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    /// `session_id` binds `order_update`/`portfolio_update` to one session
    /// (spec.md §4.5: "filtered by owning session"); omitted or `null` means
    /// unrestricted, which only the privileged-topic roles can reach since
    /// every other topic is session-agnostic.
    Subscribe {
        topic: String,
        session_id: Option<Uuid>,
    },
    Unsubscribe {
        topic: String,
    },
    Ping,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    MarketSnapshot { symbols: &'a [(String, f64)] },
    Error { message: String },
    Pong,
}

type Outbound = Arc<AsyncMutex<SplitSink<WebSocket, Message>>>;

async fn send_frame(sender: &Outbound, frame: &ServerFrame<'_>) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = sender.lock().await.send(Message::Text(json.into())).await;
    }
}

async fn handle_connection(socket: WebSocket, app: Application, identity: Identity) {
    let conn_id = Uuid::new_v4();
    let connection = Arc::new(Connection::new(conn_id, crate::broadcaster::connection::QUEUE_DEPTH));
    app.broadcaster.register(conn_id, connection.clone());

    let (sink, mut receiver) = socket.split();
    let sender: Outbound = Arc::new(AsyncMutex::new(sink));

    {
        let handle = app.registry.get(app.reference_session_id);
        if let Some(handle) = handle {
            let symbols: Vec<(String, f64)> = {
                let session = handle.lock();
                session
                    .price_states
                    .iter()
                    .map(|(symbol, state)| (symbol.clone(), state.price))
                    .collect()
            };
            send_frame(&sender, &ServerFrame::MarketSnapshot { symbols: &symbols }).await;
        }
    }

    let sender_task = {
        let connection = connection.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            connection
                .run_sender(|msg| {
                    let sender = sender.clone();
                    async move {
                        let json = serde_json::to_string(&msg).map_err(|_| ())?;
                        sender
                            .lock()
                            .await
                            .send(Message::Text(json.into()))
                            .await
                            .map_err(|_| ())
                    }
                })
                .await;
        })
    };

    while let Some(next) = receiver.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(_) => break,
        };
        match msg {
            Message::Text(text) => handle_client_frame(&text, &app, &connection, &identity, &sender).await,
            Message::Close(_) => {
                debug!(connection = %conn_id, "push channel closed by client");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    connection.close();
    app.broadcaster.unregister(conn_id);
    sender_task.abort();
}

async fn handle_client_frame(
    text: &str,
    app: &Application,
    connection: &Connection,
    identity: &Identity,
    sender: &Outbound,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            send_frame(
                sender,
                &ServerFrame::Error {
                    message: "malformed frame".into(),
                },
            )
            .await;
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { topic, session_id } => match Topic::parse(&topic) {
            Some(topic) if topic.requires_elevated_role() && !matches!(identity.role, Role::Tester | Role::Admin) => {
                send_frame(
                    sender,
                    &ServerFrame::Error {
                        message: format!("role does not permit topic {topic:?}"),
                    },
                )
                .await;
            }
            Some(topic) => {
                if matches!(topic, Topic::OrderUpdate | Topic::PortfolioUpdate) {
                    if let Some(session_id) = session_id {
                        if !session_owned_by(app, session_id, identity) {
                            send_frame(
                                sender,
                                &ServerFrame::Error {
                                    message: "session_id does not belong to this identity".into(),
                                },
                            )
                            .await;
                            return;
                        }
                        connection.set_owned_session(session_id);
                    }
                }
                connection.subscribe(topic);
            }
            None => {
                send_frame(
                    sender,
                    &ServerFrame::Error {
                        message: format!("unknown topic {topic}"),
                    },
                )
                .await;
            }
        },
        ClientFrame::Unsubscribe { topic } => {
            if let Some(topic) = Topic::parse(&topic) {
                connection.unsubscribe(topic);
            }
        }
        ClientFrame::Ping => send_frame(sender, &ServerFrame::Pong).await,
    }
}

/// Testers/admins may bind to any live session (dashboard use); an ordinary
/// user may only bind to a session it owns (spec.md §4.5 "filtered by
/// owning session").
fn session_owned_by(app: &Application, session_id: Uuid, identity: &Identity) -> bool {
    if matches!(identity.role, Role::Tester | Role::Admin) {
        return app.registry.get(session_id).is_some();
    }
    match app.registry.get(session_id) {
        Some(handle) => handle.lock().owner == Some(crate::session::SessionOwner::User(identity.user_id)),
        None => false,
    }
}
