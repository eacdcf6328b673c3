use std::future::Future;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use crate::config::AuthConfig;
use crate::error::{fallback, ApiError, Outcome};
use crate::types::{AuthTokens, RegisterRequest, UserProfile};

/// The authenticated surface of the Bangladesh Digital Auth API.
///
/// [`SessionManager`](crate::SessionManager) is generic over this trait so
/// tests can substitute a stub without touching the network. Production code
/// uses [`ApiClient`].
pub trait AuthApi: Send + Sync {
    /// Exchange email and password for a session triple.
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Outcome<AuthTokens>> + Send;

    /// Create an account; the server logs the new user in and returns a
    /// session triple.
    fn register(
        &self,
        request: &RegisterRequest,
    ) -> impl Future<Output = Outcome<AuthTokens>> + Send;

    /// Exchange a refresh token for a fresh session triple.
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Outcome<AuthTokens>> + Send;

    /// Revoke a refresh token server-side. Callers treat failure as
    /// best-effort.
    fn revoke(&self, refresh_token: &str) -> impl Future<Output = Outcome<()>> + Send;

    /// Fetch the current user's profile.
    fn current_user(&self, access_token: &str)
        -> impl Future<Output = Outcome<UserProfile>> + Send;

    /// Update the current user's profile, returning the replacement.
    fn update_profile(
        &self,
        access_token: &str,
        updates: &UserProfile,
    ) -> impl Future<Output = Outcome<UserProfile>> + Send;
}

/// HTTP client for the Bangladesh Digital Auth API.
pub struct ApiClient {
    config: AuthConfig,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for the configured API origin.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Request a password-reset email for `email`.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`] on transport or server failure.
    pub async fn forgot_password(&self, email: &str) -> Outcome<()> {
        self.call::<JsonValue>(
            Method::POST,
            "/api/v1/auth/forgot-password",
            None,
            Some(json!({ "email": email })),
            fallback::SERVER,
        )
        .await
        .map(|_| ())
    }

    /// Set a new password using the one-time token from the reset email.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`]; an expired or already-used
    /// token surfaces with the invalid-token message.
    pub async fn reset_password(&self, one_time_token: &str, new_password: &str) -> Outcome<()> {
        self.call::<JsonValue>(
            Method::POST,
            "/api/v1/auth/reset-password",
            None,
            Some(json!({ "token": one_time_token, "password": new_password })),
            fallback::INVALID_TOKEN,
        )
        .await
        .map(|_| ())
    }

    /// Send a request and normalize the response envelope into an
    /// [`Outcome`]. Every endpoint goes through here so "unauthorized" is
    /// recognizable uniformly.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<JsonValue>,
        fallback_message: &'static str,
    ) -> Outcome<T> {
        let mut request = self.http.request(method, self.config.endpoint(path));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(path, error = %e, "transport failure");
                return Err(ApiError::network());
            }
        };

        let status = response.status().as_u16();
        let parsed = response.json::<JsonValue>().await.ok();
        let data = normalize(parsed, Some(status), fallback_message)?;
        serde_json::from_value(data).map_err(|e| {
            tracing::debug!(path, error = %e, "unexpected response payload shape");
            ApiError::new(fallback_message).with_status(status)
        })
    }
}

impl AuthApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Outcome<AuthTokens> {
        self.call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
            fallback::INVALID_CREDENTIALS,
        )
        .await
    }

    async fn register(&self, request: &RegisterRequest) -> Outcome<AuthTokens> {
        let body = serde_json::to_value(request)
            .map_err(|_| ApiError::new(fallback::SERVER))?;
        self.call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(body),
            fallback::SERVER,
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Outcome<AuthTokens> {
        self.call(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh_token })),
            fallback::SESSION_EXPIRED,
        )
        .await
    }

    async fn revoke(&self, refresh_token: &str) -> Outcome<()> {
        self.call::<JsonValue>(
            Method::POST,
            "/api/v1/auth/logout",
            None,
            Some(json!({ "refresh_token": refresh_token })),
            fallback::SERVER,
        )
        .await
        .map(|_| ())
    }

    async fn current_user(&self, access_token: &str) -> Outcome<UserProfile> {
        self.call(
            Method::GET,
            "/api/v1/users/me",
            Some(access_token),
            None,
            fallback::SERVER,
        )
        .await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        updates: &UserProfile,
    ) -> Outcome<UserProfile> {
        let body = serde_json::to_value(updates)
            .map_err(|_| ApiError::new(fallback::SERVER))?;
        self.call(
            Method::PUT,
            "/api/v1/users/me",
            Some(access_token),
            Some(body),
            fallback::SERVER,
        )
        .await
    }
}

/// Turn a raw response envelope into an [`Outcome`].
///
/// `body` is the parsed response body (`None` if parsing failed), `status`
/// the HTTP status (`None` only when no response exists at all, which
/// defaults to 500). Message resolution order: first element of the first
/// array inside `error.details`, then `error.message`, then the caller's
/// fixed fallback.
pub(crate) fn normalize(
    body: Option<JsonValue>,
    status: Option<u16>,
    fallback_message: &str,
) -> Outcome<JsonValue> {
    let status = status.unwrap_or(500);
    let Some(body) = body else {
        return Err(ApiError::new(fallback_message).with_status(status));
    };

    if body.get("success").and_then(JsonValue::as_bool) == Some(true) {
        return Ok(body.get("data").cloned().unwrap_or(JsonValue::Null));
    }

    let error = body.get("error");
    let details = error.and_then(|e| e.get("details")).cloned();
    let message = details
        .as_ref()
        .and_then(first_detail_message)
        .or_else(|| {
            error
                .and_then(|e| e.get("message"))
                .and_then(JsonValue::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| fallback_message.to_owned());

    let mut err = ApiError::new(message).with_status(status);
    if let Some(code) = error.and_then(|e| e.get("code")).and_then(JsonValue::as_str) {
        err = err.with_code(code);
    }
    if let Some(details) = details {
        err = err.with_details(details);
    }
    Err(err)
}

/// First element of the first array inside the details collection, which is
/// either a mapping of field to messages or a plain array of messages.
fn first_detail_message(details: &JsonValue) -> Option<String> {
    let messages = match details {
        JsonValue::Object(map) => map.values().find_map(JsonValue::as_array)?,
        JsonValue::Array(messages) => messages,
        _ => return None,
    };
    messages.first()?.as_str().map(str::to_owned)
}
