//! Token-based authentication against a REST backend.
//!
//! Login and enroll POST JSON to their endpoints and keep the `Auth-Token`
//! response header; every guarded request then carries that header. The
//! credentials of the last successful login are remembered so a rejected
//! token can be renewed once without asking the user again.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::auth::module::{AuthenticationModule, AuthorizationFields};
use crate::config::RestAuthConfig;
use crate::error::{PipeError, Result};
use crate::http::{ureq_transport, HeaderAndBody, HttpRestProvider, TransportFactory};

/// Header carrying the session token in both directions.
pub const AUTH_TOKEN_HEADER: &str = "Auth-Token";

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Default)]
struct Session {
    token: Option<String>,
    credentials: Option<Credentials>,
}

pub struct RestAuthenticationModule {
    base_url: Url,
    config: RestAuthConfig,
    transport: TransportFactory,
    session: RwLock<Session>,
}

impl fmt::Debug for RestAuthenticationModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestAuthenticationModule")
            .field("base_url", &self.base_url.as_str())
            .field("config", &self.config)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

impl RestAuthenticationModule {
    pub fn new(base_url: Url, config: RestAuthConfig) -> Self {
        let transport = ureq_transport(config.timeout());
        Self::with_transport(base_url, config, transport)
    }

    pub fn with_transport(base_url: Url, config: RestAuthConfig, transport: TransportFactory) -> Self {
        Self {
            base_url,
            config,
            transport,
            session: RwLock::new(Session::default()),
        }
    }

    pub fn config(&self) -> &RestAuthConfig {
        &self.config
    }

    pub fn auth_token(&self) -> Option<String> {
        self.session.read().token.clone()
    }

    /// Logs in and stores the session token the server hands back.
    pub fn login(&self, username: &str, password: &str) -> Result<HeaderAndBody> {
        let body = json!({ "username": username, "password": password });
        let response = self.post_json(&self.config.login_endpoint, &body)?;

        let mut session = self.session.write();
        session.token = token_of(&response);
        session.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        info!(base_url = %self.base_url, username, "logged in");
        Ok(response)
    }

    /// Registers a new user; the server logs them in right away.
    pub fn enroll(&self, user_data: &Value) -> Result<HeaderAndBody> {
        let response = self.post_json(&self.config.enroll_endpoint, user_data)?;

        let mut session = self.session.write();
        session.token = token_of(&response);
        if let (Some(username), Some(password)) = (
            user_data.get("username").and_then(Value::as_str),
            user_data.get("password").and_then(Value::as_str),
        ) {
            session.credentials = Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        info!(base_url = %self.base_url, "enrolled");
        Ok(response)
    }

    /// Ends the session on the server and forgets the token and credentials.
    pub fn logout(&self) -> Result<()> {
        let token = self.auth_token().ok_or(PipeError::NotLoggedIn)?;
        let mut provider = self.provider(&self.config.logout_endpoint)?;
        provider.set_default_header(AUTH_TOKEN_HEADER, &token);
        provider.post(&[])?;

        *self.session.write() = Session::default();
        info!(base_url = %self.base_url, "logged out");
        Ok(())
    }

    fn provider(&self, endpoint: &str) -> Result<HttpRestProvider> {
        let url = endpoint_url(&self.base_url, endpoint)?;
        Ok((self.transport)(&url))
    }

    fn post_json(&self, endpoint: &str, body: &Value) -> Result<HeaderAndBody> {
        let mut provider = self.provider(endpoint)?;
        provider.set_default_header("Content-Type", "application/json");
        provider.post(&serde_json::to_vec(body)?)
    }
}

impl AuthenticationModule for RestAuthenticationModule {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn is_logged_in(&self) -> bool {
        self.session
            .read()
            .token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    fn auth_request_params(&self) -> AuthorizationFields {
        let mut fields = AuthorizationFields::default();
        if let Some(token) = self.auth_token() {
            fields.headers.push((AUTH_TOKEN_HEADER.to_string(), token));
        }
        fields
    }

    fn retry_login(&self) -> Result<bool> {
        let Some(credentials) = self.session.read().credentials.clone() else {
            return Ok(false);
        };
        match self.login(&credentials.username, &credentials.password) {
            Ok(_) => Ok(self.is_logged_in()),
            Err(err) if err.is_authorization_challenge() => {
                warn!(base_url = %self.base_url, error = %err, "re-login rejected");
                *self.session.write() = Session::default();
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Resolves `endpoint` below `base`, keeping every segment of `base`.
fn endpoint_url(base: &Url, endpoint: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(endpoint.trim_start_matches('/'))?)
}

fn token_of(response: &HeaderAndBody) -> Option<String> {
    response
        .headers()
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(AUTH_TOKEN_HEADER))
        .and_then(|(_, values)| values.first().cloned())
}
