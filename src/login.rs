//! Google sign-in restricted to one e-mail domain, and the server-side
//! session store that remembers signed-in users.

use crate::app::{ApiError, AppState};
use crate::config::{OAuthConfig, SessionConfig};
use crate::error::AuthError;
use crate::report::Report;
use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::{debug, info, warn};
use rand::{Rng, distributions::Alphanumeric};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
pub const SCOPE: &str = "openid email profile";

pub const SESSION_COOKIE: &str = "session";
pub const STATE_COOKIE: &str = "oauth_state";
const STATE_COOKIE_MINUTES: i64 = 10;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Profile fields returned by the OpenID userinfo endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// The two calls of an authorization-code sign-in.
pub trait IdentityProvider: Send + Sync {
    /// Trade an authorization code for an access token.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String, AuthError>>;

    fn user_info<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserInfo, AuthError>>;
}

/// Google's token and userinfo endpoints.
pub struct GoogleProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleProvider {
    pub fn new(config: &OAuthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(GoogleProvider {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }
}

impl IdentityProvider for GoogleProvider {
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String, AuthError>> {
        Box::pin(async move {
            let params = [
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ];
            let response = self
                .client
                .post(TOKEN_URL)
                .form(&params)
                .send()
                .await
                .map_err(|e| AuthError::Exchange(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Exchange(format!("{}: {}", status, body)));
            }

            let token: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::Exchange(e.to_string()))?;
            token
                .access_token
                .ok_or_else(|| AuthError::Exchange("no access token in response".to_string()))
        })
    }

    fn user_info<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserInfo, AuthError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(USERINFO_URL)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| AuthError::Profile(e.to_string()))?;

            if !response.status().is_success() {
                return Err(AuthError::Profile(response.status().to_string()));
            }

            response
                .json()
                .await
                .map_err(|e| AuthError::Profile(e.to_string()))
        })
    }
}

/// Authorization URL the browser is sent to.
///
/// `hd` asks Google to preselect accounts of the allowed domain; the
/// domain is still checked after the exchange.
pub fn login_url(config: &OAuthConfig, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&hd={}&prompt=select_account",
        AUTH_URL,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(SCOPE),
        urlencoding::encode(state),
        urlencoding::encode(&config.allowed_domain),
    )
}

/// Whether `email` belongs to `domain`, ignoring ASCII case.
///
/// # Examples
/// ```
/// use delivery_ledger::login::is_allowed_email;
///
/// assert!(is_allowed_email("Kim@Corp.KR", "corp.kr"));
/// assert!(!is_allowed_email("kim@corp.kr.evil.com", "corp.kr"));
/// ```
pub fn is_allowed_email(email: &str, domain: &str) -> bool {
    let suffix = format!("@{}", domain.to_ascii_lowercase());
    email.to_ascii_lowercase().ends_with(&suffix)
}

/// Complete a sign-in
///
/// Exchanges the code, fetches the profile and checks the account.
///
/// # Arguments
/// * `provider` - Identity provider to call
/// * `code` - Authorization code from the callback
/// * `domain` - Allowed e-mail domain
///
/// # Returns
/// * `Result<String, AuthError>` - The accepted e-mail address, or why it was refused
pub async fn authorize(
    provider: &dyn IdentityProvider,
    code: &str,
    domain: &str,
) -> Result<String, AuthError> {
    let token = provider.exchange_code(code).await?;
    let profile = provider.user_info(&token).await?;

    let email = profile.email.ok_or(AuthError::NoEmail)?;
    if profile.email_verified == Some(false) {
        warn!("Rejected sign-in for unverified {}", email);
        return Err(AuthError::Unverified(email));
    }
    if !is_allowed_email(&email, domain) {
        warn!("Rejected sign-in for {} (outside {})", email, domain);
        return Err(AuthError::Forbidden(email));
    }

    info!("Signed in {}", email);
    Ok(email)
}

/// Per-session state kept on the server.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub email: String,
    pub expires_at: SystemTime,
    /// Last report produced in this session, served by the download routes.
    pub report: Option<Arc<Report>>,
}

/// The session of the current request, added by [`require_auth`].
#[derive(Clone, Debug)]
pub struct CurrentSession {
    pub id: String,
    pub email: String,
    pub expires_at: SystemTime,
}

/// Sessions keyed by the random id stored in the session cookie.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionContext>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        let days = config.days.max(0) as u64;
        SessionStore::new(Duration::from_secs(days * 24 * 60 * 60))
    }

    /// Create a session for `email` and return its id. Expired sessions
    /// are dropped at the same time.
    pub fn create(&self, email: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let context = SessionContext {
            email: email.to_string(),
            expires_at: SystemTime::now() + self.ttl,
            report: None,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        sessions.insert(session_id.clone(), context);

        session_id
    }

    /// A live session, or `None` when unknown or expired.
    pub fn get(&self, session_id: &str) -> Option<CurrentSession> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .filter(|s| s.expires_at > SystemTime::now())
            .map(|s| CurrentSession {
                id: session_id.to_string(),
                email: s.email.clone(),
                expires_at: s.expires_at,
            })
    }

    /// Cache the report of the latest upload. Returns `false` if the
    /// session is gone.
    pub fn set_report(&self, session_id: &str, report: Report) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(session_id) {
            Some(context) => {
                context.report = Some(Arc::new(report));
                true
            }
            None => false,
        }
    }

    pub fn report(&self, session_id: &str) -> Option<Arc<Report>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .filter(|s| s.expires_at > SystemTime::now())
            .and_then(|s| s.report.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionContext> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id)
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Session named by the request's session cookie.
    pub fn current(&self, jar: &CookieJar) -> Option<CurrentSession> {
        jar.get(SESSION_COOKIE).and_then(|c| self.get(c.value()))
    }
}

pub fn session_cookie(session_id: String, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::days(config.days))
        .build()
}

fn state_cookie(state: String, secure: bool) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, state))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::minutes(STATE_COOKIE_MINUTES))
        .build()
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Authentication middleware
///
/// Lets the request through with a [`CurrentSession`] extension when the
/// session cookie names a live session, and answers 401 otherwise.
pub async fn require_auth(
    State(sessions): State<Arc<SessionStore>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match sessions.current(&jar) {
        Some(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        None => {
            debug!("Unauthenticated request to {}", request.uri().path());
            ApiError::from(AuthError::Unauthenticated).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginPageQuery {
    pub error: Option<String>,
}

/// Sign-in page, showing why the last attempt failed if there was one.
pub fn login_page(error: Option<&str>) -> Html<String> {
    let message = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape_html(e)))
        .unwrap_or_default();
    Html(include_str!("./static/login.html").replace("{{error}}", &message))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn login_failed(jar: CookieJar, error: &AuthError) -> Response {
    let target = format!("/?error={}", urlencoding::encode(&error.to_string()));
    (jar.remove(removal_cookie(STATE_COOKIE)), Redirect::to(&target)).into_response()
}

/// Start a sign-in: remember a random `state` and send the browser to
/// the provider.
pub async fn handle_login_redirect(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let oauth_state = random_state();
    let url = login_url(&state.config.oauth, &oauth_state);
    let cookie = state_cookie(oauth_state, state.config.session.cookie_secure);
    (jar.add(cookie), Redirect::to(&url)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// OAuth callback
///
/// Checks the `state`, completes the exchange and creates the session.
/// Every failure lands on the sign-in page with the reason and no session.
pub async fn handle_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        warn!("Provider returned error: {}", error);
        return login_failed(jar, &AuthError::Provider(error));
    }

    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    if expected.is_none() || expected != query.state {
        warn!("OAuth state mismatch");
        return login_failed(jar, &AuthError::StateMismatch);
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return login_failed(jar, &AuthError::MissingCode);
    };

    match authorize(state.provider.as_ref(), &code, &state.config.oauth.allowed_domain).await {
        Ok(email) => {
            let session_id = state.sessions.create(&email);
            let jar = jar
                .remove(removal_cookie(STATE_COOKIE))
                .add(session_cookie(session_id, &state.config.session));
            (jar, Redirect::to("/")).into_response()
        }
        Err(e) => login_failed(jar, &e),
    }
}

/// Sign out
///
/// Drops the session context and clears the cookie.
pub async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(context) = state.sessions.remove(cookie.value()) {
            info!("Signed out {}", context.email);
        }
    }
    (jar.remove(removal_cookie(SESSION_COOKIE)), Redirect::to("/"))
}

/// Provider answering from fixed data, for tests of the sign-in flow.
#[cfg(test)]
pub(crate) struct FakeProvider {
    pub email: Option<String>,
    pub verified: Option<bool>,
    pub fail_exchange: bool,
}

#[cfg(test)]
impl FakeProvider {
    pub(crate) fn with_email(email: &str) -> Self {
        FakeProvider {
            email: Some(email.to_string()),
            verified: Some(true),
            fail_exchange: false,
        }
    }
}

#[cfg(test)]
impl IdentityProvider for FakeProvider {
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String, AuthError>> {
        Box::pin(async move {
            if self.fail_exchange {
                Err(AuthError::Exchange("invalid_grant".to_string()))
            } else {
                Ok(format!("token-{}", code))
            }
        })
    }

    fn user_info<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserInfo, AuthError>> {
        Box::pin(async move {
            assert!(access_token.starts_with("token-"));
            Ok(UserInfo {
                email: self.email.clone(),
                email_verified: self.verified,
            })
        })
    }
}
