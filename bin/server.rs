// Florence - Web Server
// Identity gateway (register / login / logout / profile) + game API with Axum

use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use florence::{
    create_session, db, destroy_session, get_events_for_entity, identity, insert_event,
    load_player_by_owner,
    open_database, register_user, save_player, Clock, CourseRewards,
    EducationSystem, Event, GameConfig, GameError, IdentityError, Player, ProgressUpdate,
    ScaledClock, SocialClass, SqliteGateway, Transaction,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SESSION_COOKIE: &str = "sid";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    education: Arc<EducationSystem>,
    config: Arc<GameConfig>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn message(text: &str) -> Json<ApiResponse<MessageResponse>> {
    Json(ApiResponse::ok(MessageResponse {
        message: text.to_string(),
    }))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            code: None,
        }
    }

    fn internal(detail: &str) -> Self {
        error!("Internal error: {}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Not authenticated")
    }
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        let status = match err {
            GameError::InvalidAmount | GameError::InvalidIndex { .. } => StatusCode::BAD_REQUEST,
            GameError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            GameError::Forbidden(_) => StatusCode::FORBIDDEN,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::AlreadyEnrolled(_) | GameError::AlreadyCompleted(_) | GameError::NotEnrolled => {
                StatusCode::CONFLICT
            }
            GameError::PrereqUnmet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            message: err.to_string(),
            code: Some(err.kind()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError::internal(&err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(&format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: false,
            data: serde_json::json!({ "code": self.code }),
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Session extraction
// ============================================================================

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn session_cookie(token: &str, max_age_hours: i64) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        max_age_hours * 3600
    )
}

/// Logged-in user (rejects with 401 otherwise)
struct Authenticated {
    user_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = session_token(&parts.headers).ok_or_else(ApiError::unauthenticated)?;

        let conn = state.conn()?;
        let gateway = SqliteGateway::new(&conn, chrono::Utc::now());
        let user_id = gateway
            .authenticated_user(&token)?
            .ok_or_else(ApiError::unauthenticated)?;

        Ok(Authenticated { user_id })
    }
}

fn load_owned_player(conn: &Connection, user_id: &str) -> Result<Player, ApiError> {
    load_player_by_owner(conn, user_id)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "No player for this account"))
}

// ============================================================================
// Identity handlers
// ============================================================================

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    social_class: Option<SocialClass>,
}

/// POST /register
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    // User and player rows land together or not at all
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| ApiError::internal(&e.to_string()))?;

    let user = match register_user(&tx, &req.username, &req.email, &req.password) {
        Ok(user) => user,
        Err(e @ (IdentityError::Storage(_) | IdentityError::Hash(_))) => {
            return Err(ApiError::internal(&e.to_string()))
        }
        Err(e) => {
            info!("Registration rejected: {}", e);
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Registration failed"));
        }
    };

    let player = state.config.new_player(&user.username, req.social_class);
    save_player(&tx, &player, Some(&user.id))?;
    tx.commit().map_err(|e| ApiError::internal(&e.to_string()))?;

    Ok((StatusCode::CREATED, message("User registered successfully")))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// POST /login
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;

    let user = match identity::authenticate(&conn, &req.username, &req.password) {
        Ok(user) => user,
        Err(IdentityError::Storage(e)) => return Err(ApiError::internal(&e.to_string())),
        Err(_) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "Invalid username or password",
            ))
        }
    };

    let max_age = state.config.session_max_age_hours;
    let token = create_session(&conn, &user.id, Duration::hours(max_age), chrono::Utc::now())?;
    insert_event(
        &conn,
        &Event::new("login", "user", &user.id, serde_json::json!({}), &user.username),
    )?;

    let cookie = HeaderValue::from_str(&session_cookie(&token, max_age))
        .map_err(|e| ApiError::internal(&e.to_string()))?;

    Ok(([(header::SET_COOKIE, cookie)], message("Logged in successfully")))
}

/// GET /logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = session_token(&headers) {
        let conn = state.conn()?;
        destroy_session(&conn, &token).map_err(|_| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Could not log out")
        })?;
    }

    let expired = HeaderValue::from_static("sid=; HttpOnly; Path=/; Max-Age=0");
    Ok(([(header::SET_COOKIE, expired)], message("Logged out successfully")))
}

#[derive(Serialize)]
struct ProfileResponse {
    message: String,
    user: identity::User,
}

/// GET /profile - Protected route
async fn profile(State(state): State<AppState>, auth: Authenticated) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let user = identity::find_user(&conn, &auth.user_id)?.ok_or_else(ApiError::unauthenticated)?;

    Ok(Json(ApiResponse::ok(ProfileResponse {
        message: "This is a protected route".to_string(),
        user,
    })))
}

// ============================================================================
// Game handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/player
async fn get_player(State(state): State<AppState>, auth: Authenticated) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let player = load_owned_player(&conn, &auth.user_id)?;
    Ok(Json(ApiResponse::ok(player)))
}

/// GET /api/player/events - Audit trail, newest first
async fn get_player_events(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let player = load_owned_player(&conn, &auth.user_id)?;
    let events = get_events_for_entity(&conn, "player", &player.id)?;
    Ok(Json(ApiResponse::ok(events)))
}

/// GET /api/ledger/transactions
async fn get_transactions(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let player = load_owned_player(&conn, &auth.user_id)?;
    let transactions: Vec<Transaction> = player.ledger.transactions().to_vec();
    Ok(Json(ApiResponse::ok(transactions)))
}

#[derive(Deserialize)]
struct GoldRequest {
    amount: Decimal,
    #[serde(alias = "source", alias = "reason")]
    memo: String,
}

#[derive(Serialize)]
struct BalanceResponse {
    balance: Decimal,
}

/// POST /api/ledger/earn
async fn earn(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(req): Json<GoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let mut player = load_owned_player(&conn, &auth.user_id)?;

    let balance = player.ledger.earn_gold(req.amount, &req.memo, state.clock.as_ref())?;
    save_player(&conn, &player, None)?;

    Ok(Json(ApiResponse::ok(BalanceResponse { balance })))
}

/// POST /api/ledger/spend
async fn spend(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(req): Json<GoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let mut player = load_owned_player(&conn, &auth.user_id)?;

    let balance = player.ledger.spend_gold(req.amount, &req.memo, state.clock.as_ref())?;
    save_player(&conn, &player, None)?;

    Ok(Json(ApiResponse::ok(BalanceResponse { balance })))
}

/// GET /api/courses - Courses available to the player
async fn get_courses(State(state): State<AppState>, auth: Authenticated) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let player = load_owned_player(&conn, &auth.user_id)?;

    let courses: Vec<_> = state
        .education
        .available_courses(&player)
        .into_iter()
        .cloned()
        .collect();

    Ok(Json(ApiResponse::ok(courses)))
}

#[derive(Deserialize)]
struct EnrollRequest {
    course: String,
}

/// POST /api/courses/enroll
async fn enroll(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(req): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let mut player = load_owned_player(&conn, &auth.user_id)?;

    let receipt = state
        .education
        .enroll(&mut player, &req.course, state.clock.as_ref())?;
    save_player(&conn, &player, None)?;
    insert_event(
        &conn,
        &Event::new(
            "course_enrolled",
            "player",
            &player.id,
            serde_json::json!({ "course": receipt.course_id, "cost": receipt.cost }),
            &auth.user_id,
        ),
    )?;

    Ok(Json(ApiResponse::ok(receipt)))
}

/// POST /api/education/progress
async fn update_progress(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let mut player = load_owned_player(&conn, &auth.user_id)?;

    let update = state
        .education
        .update_progress(&mut player, state.clock.as_ref())?;
    save_player(&conn, &player, None)?;

    if let ProgressUpdate::Completed(done) = &update {
        insert_event(
            &conn,
            &Event::new(
                "course_completed",
                "player",
                &player.id,
                serde_json::json!({ "course": done.course_id }),
                &auth.user_id,
            ),
        )?;
    }

    Ok(Json(ApiResponse::ok(update)))
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/player", get(get_player))
        .route("/player/events", get(get_player_events))
        .route("/ledger/transactions", get(get_transactions))
        .route("/ledger/earn", post(earn))
        .route("/ledger/spend", post(spend))
        .route("/courses", get(get_courses))
        .route("/courses/enroll", post(enroll))
        .route("/education/progress", post(update_progress));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/profile", get(profile))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GameConfig::load()?;
    let conn = open_database(&config.database_path)?;
    info!("Database opened: {:?} ({} players)", config.database_path, db::count_players(&conn)?);

    let education = EducationSystem::with_hooks(config.load_catalogue()?, CourseRewards);
    let clock = ScaledClock::starting_at(config.game_epoch(), config.time_scale);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        education: Arc::new(education),
        clock: Arc::new(clock),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use florence::{setup_database, CourseCatalogue, ManualClock};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let clock = ManualClock::new(GameConfig::default().game_epoch());

        AppState {
            db: Arc::new(Mutex::new(conn)),
            education: Arc::new(EducationSystem::new(CourseCatalogue::florentine().unwrap())),
            config: Arc::new(GameConfig::default()),
            clock: Arc::new(clock),
        }
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register + login; returns the `sid=...` cookie pair
    async fn login_cookie(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/register",
                serde_json::json!({
                    "username": "lorenzo",
                    "email": "lorenzo@medici.it",
                    "password": "magnifico",
                    "social_class": "merchant"
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/login",
                serde_json::json!({ "username": "lorenzo", "password": "magnifico" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_session_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; sid=abc123; lang=it"));
        assert_eq!(session_token(&headers), Some("abc123".to_string()));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_game_error_status_mapping() {
        let err: ApiError = GameError::Forbidden("Law".to_string()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        let err: ApiError = GameError::InvalidAmount.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, Some("invalid_amount"));
    }

    #[tokio::test]
    async fn test_profile_requires_session() {
        let app = build_router(test_state());

        let response = app.oneshot(get_request("/profile", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Not authenticated");
    }

    #[tokio::test]
    async fn test_login_with_bad_password() {
        let app = build_router(test_state());
        login_cookie(&app).await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/login",
                serde_json::json!({ "username": "lorenzo", "password": "wrong" }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid username or password");
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let app = build_router(test_state());
        login_cookie(&app).await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/register",
                serde_json::json!({
                    "username": "lorenzo",
                    "email": "other@medici.it",
                    "password": "pw"
                }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Registration failed");
    }

    #[tokio::test]
    async fn test_profile_and_logout() {
        let app = build_router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app.clone().oneshot(get_request("/profile", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["message"], "This is a protected route");
        assert_eq!(body["data"]["user"]["username"], "lorenzo");
        assert_eq!(body["data"]["user"]["email"], "lorenzo@medici.it");

        let response = app.clone().oneshot(get_request("/logout", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/profile", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_earn_spend_and_enroll() {
        let app = build_router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ledger/earn",
                serde_json::json!({ "amount": "50", "source": "Job" }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["balance"].as_str().unwrap().parse::<Decimal>().unwrap(), Decimal::from(145));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ledger/spend",
                serde_json::json!({ "amount": "1000", "reason": "Palazzo" }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["code"], "insufficient_funds");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/courses/enroll",
                serde_json::json!({ "course": "Trivium Studies" }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/courses/enroll",
                serde_json::json!({ "course": "Law" }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(get_request("/api/ledger/transactions", Some(&cookie)))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let response = app
            .oneshot(get_request("/api/player/events", Some(&cookie)))
            .await
            .unwrap();
        let body = body_json(response).await;
        let events = body["data"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event_type"], "course_enrolled");
        assert_eq!(events[0]["data"]["course"], "Trivium Studies");
    }

    #[tokio::test]
    async fn test_failed_player_save_rolls_back_registration() {
        let state = test_state();
        state
            .db
            .lock()
            .unwrap()
            .execute("DROP TABLE players", [])
            .unwrap();
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_request(
                "POST",
                "/register",
                serde_json::json!({
                    "username": "lorenzo",
                    "email": "lorenzo@medici.it",
                    "password": "magnifico"
                }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let users: i64 = state
            .db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 0);
    }
}
