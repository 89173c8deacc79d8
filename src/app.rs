use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::downloader::{self, CSV_FILE_NAME, XLSX_FILE_NAME};
use crate::error::{AuthError, ReportError};
use crate::header::HeaderMode;
use crate::login::{
    CurrentSession, GoogleProvider, IdentityProvider, LoginPageQuery, SessionStore,
    handle_callback, handle_login_redirect, handle_logout, login_page, require_auth,
};
use crate::pipeline::{self, HeaderPreview, PipelineConfig};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shared state of the web application.
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
    pub provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(config: AppConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config.session));
        AppState {
            config,
            sessions,
            provider,
        }
    }
}

#[derive(Serialize)]
struct ApiResponse {
    status: String,
    message: Option<String>,
}

/// A failed API call, rendered as `{ status: "error", message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        let status = if e.is_user_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match e {
            AuthError::Forbidden(_) | AuthError::Unverified(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        ApiError::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        } else {
            debug!("Request failed ({}): {}", self.status, self.message);
        }
        let body = ApiResponse {
            status: "error".to_string(),
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the application router
///
/// Everything under `/api` requires a live session.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/me", get(current_account))
        .route("/api/header", post(preview_upload_header))
        .route("/api/report", post(upload_report).get(get_report))
        .route("/api/report/xlsx", get(download_xlsx))
        .route("/api/report/csv", get(download_csv))
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            require_auth,
        ));

    Router::new()
        .route("/", get(serve_index))
        .route("/login", get(handle_login_redirect))
        .route("/auth/callback", get(handle_callback))
        .route("/logout", post(handle_logout))
        .route("/health", get(health_check))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes)),
        )
        .with_state(state)
}

/// Start the web server and serve until it fails.
pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = GoogleProvider::new(&config.oauth)?;
    let addr = config.bind_address();
    info!(
        "Sign-in limited to @{}, sessions last {} days",
        config.oauth.allowed_domain, config.session.days
    );

    let state = Arc::new(AppState::new(config, Arc::new(provider)));

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sessions.sweep();
            if removed > 0 {
                debug!("Removed {} expired sessions", removed);
            }
        }
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_index(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LoginPageQuery>,
) -> Html<String> {
    match state.sessions.current(&jar) {
        Some(_) => Html(include_str!("./static/index.html").to_string()),
        None => login_page(query.error.as_deref()),
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct AccountResponse {
    email: String,
    expires_at: String,
}

async fn current_account(Extension(session): Extension<CurrentSession>) -> Json<AccountResponse> {
    Json(AccountResponse {
        email: session.email,
        expires_at: DateTime::<Utc>::from(session.expires_at).to_rfc3339(),
    })
}

/// An uploaded file plus the optional header row override.
struct Upload {
    file_name: String,
    bytes: Vec<u8>,
    header_mode: Option<HeaderMode>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut header_mode = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some((file_name, bytes.to_vec()));
            }
            "header_row" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                header_mode = parse_header_row(&text)?;
            }
            _ => {}
        }
    }

    match file {
        Some((file_name, bytes)) if !file_name.is_empty() && !bytes.is_empty() => Ok(Upload {
            file_name,
            bytes,
            header_mode,
        }),
        _ => Err(ApiError::bad_request("No file data received")),
    }
}

/// Blank means automatic detection; otherwise a 1-based row number.
fn parse_header_row(text: &str) -> Result<Option<HeaderMode>, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match text.parse::<usize>() {
        Ok(row) if row >= 1 => Ok(Some(HeaderMode::Fixed(row - 1))),
        _ => Err(ApiError::bad_request(format!(
            "Header row must be a row number starting at 1, got {}",
            text
        ))),
    }
}

fn pipeline_config(state: &AppState, upload: &Upload) -> PipelineConfig {
    match upload.header_mode {
        Some(mode) => state.config.pipeline.with_header_mode(mode),
        None => state.config.pipeline.clone(),
    }
}

async fn preview_upload_header(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<HeaderPreview>, ApiError> {
    let upload = read_upload(multipart).await?;
    let config = pipeline_config(&state, &upload);

    let preview = tokio::task::spawn_blocking(move || {
        pipeline::preview_header(&upload.bytes, &upload.file_name, &config)
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    Ok(Json(preview))
}

async fn upload_report(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let config = pipeline_config(&state, &upload);
    info!(
        "{} uploaded {} ({} bytes)",
        session.email,
        upload.file_name,
        upload.bytes.len()
    );

    let report = tokio::task::spawn_blocking(move || {
        pipeline::process_upload(&upload.bytes, &upload.file_name, &config)
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .inspect_err(|e| warn!("Upload by {} failed: {}", session.email, e))?;

    let preview = report.preview_json();
    if !state.sessions.set_report(&session.id, report) {
        return Err(AuthError::Unauthenticated.into());
    }
    Ok(Json(preview))
}

fn cached_report(
    state: &AppState,
    session: &CurrentSession,
) -> Result<Arc<crate::report::Report>, ApiError> {
    state
        .sessions
        .report(&session.id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "No report yet, upload a file first"))
}

async fn get_report(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
) -> Result<Json<Value>, ApiError> {
    let report = cached_report(&state, &session)?;
    Ok(Json(report.preview_json()))
}

async fn download_xlsx(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
) -> Result<Response, ApiError> {
    let report = cached_report(&state, &session)?;
    let bytes = downloader::to_xlsx(&report)?;
    Ok(attachment(
        bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        XLSX_FILE_NAME,
        "delivery_ledger.xlsx",
    ))
}

async fn download_csv(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
) -> Result<Response, ApiError> {
    let report = cached_report(&state, &session)?;
    let bytes = downloader::to_csv(&report)?;
    Ok(attachment(
        bytes,
        "text/csv; charset=utf-8",
        CSV_FILE_NAME,
        "delivery_ledger.csv",
    ))
}

/// A download response. `file_name` goes in the RFC 5987 `filename*`
/// parameter, `fallback` in the plain ASCII one.
fn attachment(bytes: Vec<u8>, content_type: &'static str, file_name: &str, fallback: &str) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::{FakeProvider, SESSION_COOKIE, STATE_COOKIE};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "ledger-test-boundary";

    fn test_state(email: &str) -> Arc<AppState> {
        let config = AppConfig::from_lookup(|name| {
            let value = match name {
                "GOOGLE_CLIENT_ID" => Some("client"),
                "GOOGLE_CLIENT_SECRET" => Some("secret"),
                "GOOGLE_REDIRECT_URI" => Some("http://localhost:3000/auth/callback"),
                "ALLOWED_EMAIL_DOMAIN" => Some("example.com"),
                _ => None,
            };
            value.map(str::to_string)
        })
        .unwrap();
        Arc::new(AppState::new(config, Arc::new(FakeProvider::with_email(email))))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    fn multipart(file_name: &str, content: &str, header_row: Option<&str>) -> Body {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n",
            b = BOUNDARY,
            f = file_name,
            c = content
        );
        if let Some(row) = header_row {
            body.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"header_row\"\r\n\r\n{}\r\n",
                BOUNDARY, row
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        Body::from(body)
    }

    fn upload_request(uri: &str, session_id: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session_id))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .unwrap()
    }

    fn get_request(uri: &str, session_id: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session_id))
            .body(Body::empty())
            .unwrap()
    }

    fn callback_request(state: &str, cookie_state: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/auth/callback?code=abc&state={}", state))
            .header(header::COOKIE, format!("{}={}", STATE_COOKIE, cookie_state))
            .body(Body::empty())
            .unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION].to_str().unwrap().to_string()
    }

    const ERP_CSV: &str = "납품 현황\n,,\n거래처,발주번호,품번,품명,납품수량,금액,부가세,금액계\nA,PO1,I1,Widget,10,100,10,110\nA,PO1,I1,Widget,5,50,5,55\n";

    #[tokio::test]
    async fn health_is_public() {
        let app = build_router(test_state("kim@example.com"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        let app = build_router(test_state("kim@example.com"));
        let response = app.oneshot(get_request("/api/report", "forged")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Not signed in");
    }

    #[tokio::test]
    async fn index_shows_login_page_without_session() {
        let app = build_router(test_state("kim@example.com"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?error=denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_text(response).await;
        assert!(page.contains("href=\"/login\""));
        assert!(page.contains("denied"));
    }

    #[tokio::test]
    async fn login_redirect_sets_state_cookie() {
        let app = build_router(test_state("kim@example.com"));
        let response = app
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).contains("hd=example.com"));
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with(STATE_COOKIE));
    }

    #[tokio::test]
    async fn outside_domain_is_denied_without_session() {
        let state = test_state("user@other.com");
        let app = build_router(state.clone());
        let response = app.oneshot(callback_request("s1", "s1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/?error="));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn state_mismatch_is_denied() {
        let state = test_state("kim@example.com");
        let app = build_router(state.clone());
        let response = app.oneshot(callback_request("s1", "other")).await.unwrap();
        assert!(location(&response).starts_with("/?error="));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn provider_error_is_denied() {
        let state = test_state("kim@example.com");
        let app = build_router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?error=access_denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(location(&response).contains("access_denied"));
        assert!(state.sessions.is_empty());
    }

    async fn sign_in(state: &Arc<AppState>) -> String {
        let response = build_router(state.clone())
            .oneshot(callback_request("s1", "s1"))
            .await
            .unwrap();
        assert_eq!(location(&response), "/");
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix("session="))
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn signed_in_user_builds_and_downloads_a_report() {
        let state = test_state("kim@example.com");
        let session_id = sign_in(&state).await;

        let me = build_router(state.clone())
            .oneshot(get_request("/api/me", &session_id))
            .await
            .unwrap();
        assert_eq!(body_json(me).await["email"], "kim@example.com");

        let missing = build_router(state.clone())
            .oneshot(get_request("/api/report", &session_id))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let response = build_router(state.clone())
            .oneshot(upload_request(
                "/api/report",
                &session_id,
                multipart("erp.csv", ERP_CSV, None),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["rows"][0]["납품수량"], "15");
        assert_eq!(json["rows"][0]["납품단가"], "10");
        assert_eq!(json["provenance"]["header_index"], 2);

        let cached = build_router(state.clone())
            .oneshot(get_request("/api/report", &session_id))
            .await
            .unwrap();
        assert_eq!(body_json(cached).await, json);

        let xlsx = build_router(state.clone())
            .oneshot(get_request("/api/report/xlsx", &session_id))
            .await
            .unwrap();
        assert_eq!(xlsx.status(), StatusCode::OK);
        let disposition = xlsx.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("filename*=UTF-8''%EB%82%A9"));

        let csv = build_router(state.clone())
            .oneshot(get_request("/api/report/csv", &session_id))
            .await
            .unwrap();
        assert!(body_text(csv).await.contains("A,PO1,I1,Widget,10,15,150,15,165,,0,165"));
    }

    #[tokio::test]
    async fn header_preview_and_bad_uploads() {
        let state = test_state("kim@example.com");
        let session_id = sign_in(&state).await;

        let response = build_router(state.clone())
            .oneshot(upload_request(
                "/api/header",
                &session_id,
                multipart("erp.csv", ERP_CSV, None),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["row_number"], 3);
        assert_eq!(json["cells"][0], "거래처");

        let response = build_router(state.clone())
            .oneshot(upload_request(
                "/api/header",
                &session_id,
                multipart("erp.csv", ERP_CSV, Some("zero")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = build_router(state.clone())
            .oneshot(upload_request(
                "/api/report",
                &session_id,
                multipart("erp.csv", ERP_CSV, Some("1")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["message"].as_str().unwrap().contains("납품 현황"));

        let response = build_router(state.clone())
            .oneshot(upload_request(
                "/api/report",
                &session_id,
                multipart("erp.pdf", "x", None),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let state = test_state("kim@example.com");
        let session_id = sign_in(&state).await;

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(state.sessions.get(&session_id).is_none());
    }

    #[test]
    fn header_row_field() {
        assert_eq!(parse_header_row(" ").unwrap(), None);
        assert_eq!(parse_header_row("4").unwrap(), Some(HeaderMode::Fixed(3)));
        assert!(parse_header_row("0").is_err());
        assert!(parse_header_row("-1").is_err());
    }
}
