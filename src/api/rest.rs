// =============================================================================
// ControlAPI — request surface (C11, spec.md §6)
// =============================================================================

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::Application;
use crate::auth::Bearer;
use crate::error::{ApiError, AuthError, ChatError, SaveError, SessionError, TradeError};
use crate::save_store::Snapshot;
use crate::user_store::{NewUser, Role};

/// Builds the REST surface without attaching state, so callers can merge in
/// additional routes (the push channel) before calling `.with_state(..)`
/// exactly once.
pub fn router() -> Router<Application> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/profile", get(profile))
        .route("/chat/messages", get(get_chat_messages).post(post_chat_message))
        .route("/bot/register", post(bot_register))
        .route("/bot/order", post(bot_order))
        .route("/bot/:id/stats", get(bot_stats))
        .route("/market/data", get(market_data))
        .route("/portfolio", get(portfolio))
        .route("/saves/create", post(create_save))
        .route("/saves/:code", get(get_save).post(upsert_preset))
        .route(
            "/saves/:code/preset/:name",
            get(get_preset).delete(delete_preset),
        )
        .route("/health", get(health))
}

// ---------------------------------------------------------------- auth -----

#[derive(Deserialize)]
struct RegisterRequest {
    identifier: String,
    password_hash: String,
    display_name: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    user_id: Uuid,
}

async fn register(
    State(app): State<Application>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if body.identifier.trim().is_empty() || body.password_hash.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"tag": "Validation", "message": "identifier and password are required"})),
        ));
    }
    let user_id = app
        .users
        .register(NewUser {
            email: None,
            username: Some(body.identifier.clone()),
            display_name: body.display_name,
            password_hash: body.password_hash,
            role: Role::User,
        })
        .map_err(|msg| {
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"tag": "Exists", "message": msg})),
            )
        })?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

#[derive(Deserialize)]
struct LoginRequest {
    identifier: String,
    password_hash: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    role: Role,
}

async fn login(
    State(app): State<Application>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let user = app.users.authenticate(&body.identifier, &body.password_hash)?;
    let token = app.auth.issue(user.user_id, user.role)?;
    Ok(Json(LoginResponse { token, role: user.role }))
}

async fn profile(
    State(app): State<Application>,
    Bearer(identity): Bearer,
) -> Result<Json<crate::user_store::User>, AuthError> {
    let user = app.users.get(identity.user_id).ok_or(AuthError::InvalidCredential)?;
    Ok(Json(user))
}

// ---------------------------------------------------------------- chat -----

#[derive(Deserialize)]
struct ChatQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_page() -> usize {
    0
}
fn default_limit() -> usize {
    50
}

async fn get_chat_messages(
    State(app): State<Application>,
    Bearer(identity): Bearer,
    Query(q): Query<ChatQuery>,
) -> Result<Json<crate::chat::ChatPage>, AuthError> {
    identity.require_role(&[Role::Tester, Role::Admin])?;
    let offset = q.page.saturating_mul(q.limit.max(1));
    Ok(Json(app.chat.get_messages(q.limit, offset)))
}

#[derive(Deserialize)]
struct PostChatRequest {
    text: String,
}

async fn post_chat_message(
    State(app): State<Application>,
    Bearer(identity): Bearer,
    Json(body): Json<PostChatRequest>,
) -> Result<impl IntoResponse, ChatResponseError> {
    identity
        .require_role(&[Role::Tester, Role::Admin])
        .map_err(ChatResponseError::Auth)?;
    let message = app
        .chat
        .post(identity.user_id, &body.text)
        .await
        .map_err(ChatResponseError::Chat)?;
    Ok((StatusCode::CREATED, Json(message)))
}

enum ChatResponseError {
    Auth(AuthError),
    Chat(ChatError),
}
impl IntoResponse for ChatResponseError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ChatResponseError::Auth(e) => e.into_response(),
            ChatResponseError::Chat(e) => e.into_response(),
        }
    }
}

// ----------------------------------------------------------------- bot -----

#[derive(Serialize)]
struct BotRegisterResponse {
    bot_id: Uuid,
    api_key: String,
}

async fn bot_register(State(app): State<Application>) -> impl IntoResponse {
    let (session_id, key) = app.register_bot();
    (
        StatusCode::CREATED,
        Json(BotRegisterResponse {
            bot_id: session_id,
            api_key: key,
        }),
    )
}

#[derive(Deserialize)]
struct BotOrderRequest {
    symbol: String,
    side: String,
    quantity: u64,
}

async fn bot_order(
    State(app): State<Application>,
    headers: axum::http::HeaderMap,
    Json(body): Json<BotOrderRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let key = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::BadBotKey)?;
    let session_id = app.resolve_bot_key(key)?;
    let handle = app.registry.get(session_id).ok_or(AuthError::BadBotKey)?;

    // Commission is a Config-level policy; the bot path opts in (spec.md
    // §4.3, §9 Open Question).
    let result = {
        let mut session = handle.lock();
        session.config.commission_enabled = true;
        match body.side.to_ascii_lowercase().as_str() {
            "buy" => crate::trader::Trader::buy(&mut session, &body.symbol, body.quantity),
            "sell" => crate::trader::Trader::sell(&mut session, &body.symbol, body.quantity),
            "short_open" => crate::trader::Trader::open_short(&mut session, &body.symbol, body.quantity),
            "short_close" => crate::trader::Trader::close_short(&mut session, &body.symbol, body.quantity),
            _ => Err(TradeError::InvalidQuantity),
        }
    };

    match result {
        Ok(trade) => {
            app.broadcaster
                .publish(crate::broadcaster::BroadcastMessage::OrderUpdate {
                    session_id,
                    trade_id: trade.id,
                    symbol: trade.symbol.clone(),
                    kind: format!("{:?}", trade.kind).to_lowercase(),
                    quantity: trade.quantity,
                    execution_price: trade.execution_price,
                })
                .await;
            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({"status": "filled", "trade": trade})),
            ))
        }
        Err(err) => Ok((StatusCode::OK, Json(err.bot_order_response()))),
    }
}

#[derive(Serialize)]
struct BotStatsResponse {
    bot_id: Uuid,
    total_value: f64,
    realized_gains: f64,
    trade_count: usize,
    total_return_pct: f64,
    win_rate: f64,
}

async fn bot_stats(
    State(app): State<Application>,
    Path(id): Path<Uuid>,
) -> Result<Json<BotStatsResponse>, SessionError> {
    let handle = app
        .registry
        .get(id)
        .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
    let session = handle.lock();
    let starting_capital = session.config.starting_capital;
    let total_value = session.total_value();
    let total_return_pct = if starting_capital > 0.0 {
        (total_value - starting_capital) / starting_capital * 100.0
    } else {
        0.0
    };
    let closing_trades = session.trades.iter().filter(|t| {
        matches!(
            t.kind,
            crate::portfolio::TradeKind::Sell | crate::portfolio::TradeKind::ShortClose
        )
    });
    let (wins, closed) = closing_trades.fold((0usize, 0usize), |(wins, closed), t| {
        (wins + usize::from(t.realized_pnl > 0.0), closed + 1)
    });
    let win_rate = if closed > 0 { wins as f64 / closed as f64 * 100.0 } else { 0.0 };
    Ok(Json(BotStatsResponse {
        bot_id: id,
        total_value,
        realized_gains: session.portfolio.realized_gains,
        trade_count: session.trades.len(),
        total_return_pct,
        win_rate,
    }))
}

// -------------------------------------------------------------- market -----

#[derive(Deserialize)]
struct MarketQuery {
    symbol: Option<String>,
}

#[derive(Serialize)]
struct MarketSnapshot {
    symbol: String,
    price: f64,
}

async fn market_data(
    State(app): State<Application>,
    Query(q): Query<MarketQuery>,
) -> Result<Json<Vec<MarketSnapshot>>, TradeError> {
    let handle = app
        .registry
        .get(app.reference_session_id)
        .expect("reference session always exists");
    let session = handle.lock();

    if let Some(symbol) = q.symbol {
        let price = session
            .current_price(&symbol)
            .ok_or_else(|| TradeError::SymbolUnknown(symbol.clone()))?;
        return Ok(Json(vec![MarketSnapshot { symbol, price }]));
    }

    Ok(Json(
        session
            .price_states
            .iter()
            .map(|(symbol, state)| MarketSnapshot {
                symbol: symbol.clone(),
                price: state.price,
            })
            .collect(),
    ))
}

// ------------------------------------------------------------ portfolio ----

#[derive(Deserialize)]
struct PortfolioQuery {
    bot_id: Uuid,
}

#[derive(Serialize)]
struct Allocation {
    current: std::collections::HashMap<String, f64>,
    target: std::collections::HashMap<String, f64>,
}

#[derive(Serialize)]
struct PortfolioResponse {
    cash: f64,
    total_value: f64,
    unrealized_pnl: f64,
    positions: std::collections::HashMap<String, crate::portfolio::Position>,
    shorts: std::collections::HashMap<String, crate::portfolio::ShortPosition>,
    /// Present only for portfolio-mode sessions (spec.md §4.9).
    allocation: Option<Allocation>,
}

async fn portfolio(
    State(app): State<Application>,
    Query(q): Query<PortfolioQuery>,
) -> Result<Json<PortfolioResponse>, SessionError> {
    let handle = app
        .registry
        .get(q.bot_id)
        .ok_or_else(|| SessionError::UnknownSession(q.bot_id.to_string()))?;
    let session = handle.lock();
    Ok(Json(PortfolioResponse {
        cash: session.portfolio.cash,
        total_value: session.total_value(),
        unrealized_pnl: session
            .portfolio
            .unrealized_pnl(|sym| session.current_price(sym)),
        positions: session.portfolio.positions.clone(),
        shorts: session.portfolio.shorts.clone(),
        allocation: session
            .portfolio_allocation()
            .map(|(current, target)| Allocation { current, target }),
    }))
}

// --------------------------------------------------------------- saves -----

async fn create_save(State(app): State<Application>) -> Result<impl IntoResponse, SaveError> {
    let mut rng = rand::thread_rng();
    let code = app.save_store.create_code(&mut rng)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({"code": code}))))
}

async fn get_save(
    State(app): State<Application>,
    Path(code): Path<String>,
) -> Result<Json<crate::save_store::SaveRecord>, SaveError> {
    Ok(Json(app.save_store.get(&code)?))
}

#[derive(Deserialize)]
struct UpsertPresetRequest {
    preset_name: String,
    snapshot: Snapshot,
}

async fn upsert_preset(
    State(app): State<Application>,
    Path(code): Path<String>,
    Json(body): Json<UpsertPresetRequest>,
) -> Result<impl IntoResponse, SaveError> {
    app.save_store.put(&code, &body.preset_name, body.snapshot)?;
    Ok(StatusCode::OK)
}

async fn get_preset(
    State(app): State<Application>,
    Path((code, name)): Path<(String, String)>,
) -> Result<Json<Snapshot>, SaveError> {
    Ok(Json(app.save_store.get_preset(&code, &name)?))
}

async fn delete_preset(
    State(app): State<Application>,
    Path((code, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, SaveError> {
    app.save_store.delete_preset(&code, &name)?;
    Ok(StatusCode::OK)
}

// -------------------------------------------------------------- health -----

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: i64,
    active_sessions: usize,
    server_time: chrono::DateTime<chrono::Utc>,
}

async fn health(State(app): State<Application>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: (now - app.started_at).num_seconds(),
        active_sessions: app.registry.len(),
        server_time: now,
    })
}
