//! The capability every authentication module offers to pipes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::Result;

/// Selects which module implementation a registry entry is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    Rest,
}

/// Headers and query parameters a module adds to an outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationFields {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl AuthorizationFields {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.query.is_empty()
    }
}

/// Supplies credentials for requests and reacts to authorization challenges.
pub trait AuthenticationModule: Send + Sync + fmt::Debug {
    fn base_url(&self) -> &Url;

    fn is_logged_in(&self) -> bool;

    /// Credentials to attach to the next request.
    fn auth_request_params(&self) -> AuthorizationFields;

    /// Called after the server rejected a request's credentials.
    ///
    /// Re-authenticates (possibly blocking) and returns whether the rejected
    /// request should be sent once more.
    fn retry_login(&self) -> Result<bool>;

    /// Recovers the concrete module type behind a trait object.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
