//! Typed CRUD pipes over `HttpRestProvider`.
//!
//! # Design
//! `RestRunner` resolves the target URL, lets the authentication module (if
//! any) augment the request, and hands a fresh provider to the transport
//! call. When the server answers with an authorization challenge the module
//! gets exactly one `retry_login`; if it says yes the whole attempt (augment,
//! then transport) runs once more and whatever it returns is final. Records
//! travel as JSON through serde; the record id lives in a configurable field.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AuthenticationModule, Authenticator};
use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::http::{ureq_transport, HttpRestProvider, TransportFactory};

/// Restricts which records a read returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Field/value pairs the records must match.
    pub where_clause: Map<String, Value>,
}

impl ReadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn matching(mut self, field: &str, value: Value) -> Self {
        self.where_clause.insert(field.to_string(), value);
        self
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        for (field, value) in &self.where_clause {
            pairs.push((field.clone(), scalar_string(value)));
        }
        pairs
    }
}

/// The CRUD verbs a pipe offers for records of type `T`.
pub trait PipeHandler<T>: Send + Sync {
    fn on_read(&self, filter: Option<&ReadFilter>) -> Result<Vec<T>>;

    /// Creates the record when it has no id, updates it otherwise.
    fn on_save(&self, item: &T) -> Result<T>;

    fn on_remove(&self, id: &str) -> Result<()>;
}

/// `PipeHandler` backed by a REST collection.
pub struct RestRunner<T> {
    config: PipeConfig,
    auth: Option<Arc<dyn AuthenticationModule>>,
    transport: TransportFactory,
    _record: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RestRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestRunner")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl<T> RestRunner<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(config: PipeConfig) -> Self {
        let transport = ureq_transport(config.timeout());
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: PipeConfig, transport: TransportFactory) -> Self {
        Self {
            config,
            auth: None,
            transport,
            _record: PhantomData,
        }
    }

    /// A runner guarded by the module named in `config.auth_module`.
    pub fn from_registry(config: PipeConfig, registry: &Authenticator) -> Result<Self> {
        let auth = match &config.auth_module {
            Some(name) => Some(registry.get(name).ok_or_else(|| {
                PipeError::InvalidArgument(format!("no authentication module named '{name}'"))
            })?),
            None => None,
        };
        let mut runner = Self::new(config);
        runner.auth = auth;
        Ok(runner)
    }

    pub fn with_auth(mut self, module: Arc<dyn AuthenticationModule>) -> Self {
        self.auth = Some(module);
        self
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Runs `op`; on an authorization challenge lets the module re-login and
    /// runs it once more.
    fn call<R>(&self, url: &Url, op: impl Fn(&HttpRestProvider) -> Result<R>) -> Result<R> {
        match self.attempt(url, &op) {
            Err(err) if err.is_authorization_challenge() => {
                let Some(auth) = &self.auth else {
                    return Err(err);
                };
                warn!(pipe = %self.config.name, error = %err, "authorization challenge, retrying login");
                if auth.retry_login()? {
                    self.attempt(url, &op)
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }

    fn attempt<R>(&self, url: &Url, op: &impl Fn(&HttpRestProvider) -> Result<R>) -> Result<R> {
        let mut url = url.clone();
        let mut headers = Vec::new();
        if let Some(auth) = &self.auth {
            let fields = auth.auth_request_params();
            if !fields.query.is_empty() {
                url.query_pairs_mut().extend_pairs(fields.query.iter());
            }
            headers = fields.headers;
        }

        let mut provider = (self.transport)(&url);
        provider.set_default_header("Accept", "application/json");
        for (name, value) in &headers {
            provider.set_default_header(name, value);
        }
        op(&provider)
    }

    fn read_url(&self, filter: Option<&ReadFilter>) -> Url {
        let mut url = self.config.base_url.clone();
        let pairs = filter.map(ReadFilter::query_pairs).unwrap_or_default();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs.iter());
        }
        url
    }

    fn parse_records(&self, body: &[u8]) -> Result<Vec<T>> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let mut value: Value = serde_json::from_slice(body)?;
        if let Some(root) = &self.config.data_root {
            let Some(nested) = value.get_mut(root.as_str()).map(Value::take) else {
                debug!(pipe = %self.config.name, root = %root, "data root missing from response");
                return Ok(Vec::new());
            };
            value = nested;
        }
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => Ok(serde_json::from_value(value)?),
            single => Ok(vec![serde_json::from_value(single)?]),
        }
    }
}

impl<T> PipeHandler<T> for RestRunner<T>
where
    T: Serialize + DeserializeOwned,
{
    fn on_read(&self, filter: Option<&ReadFilter>) -> Result<Vec<T>> {
        let url = self.read_url(filter);
        debug!(pipe = %self.config.name, url = %url, "read");
        let response = self.call(&url, HttpRestProvider::get)?;
        self.parse_records(response.body())
    }

    fn on_save(&self, item: &T) -> Result<T> {
        let value = serde_json::to_value(item)?;
        let body = serde_json::to_vec(&value)?;
        let id = record_id_of(&value, &self.config.record_id);
        debug!(pipe = %self.config.name, id = id.as_deref(), "save");

        let response = self.call(&self.config.base_url, |provider| {
            let mut provider = provider.clone();
            provider.set_default_header("Content-Type", "application/json");
            match &id {
                Some(id) => provider.put(id, &body),
                None => provider.post(&body),
            }
        })?;

        if response.body().iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(value)?);
        }
        Ok(serde_json::from_slice(response.body())?)
    }

    fn on_remove(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(PipeError::InvalidArgument("record id must not be empty".to_string()));
        }
        debug!(pipe = %self.config.name, id, "remove");
        self.call(&self.config.base_url, |provider| provider.delete(id))?;
        Ok(())
    }
}

/// The id stored in `field`, rendered as a path segment.
fn record_id_of(record: &Value, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
