//! HTTP transport: connections, the response envelope and `HttpRestProvider`.
//!
//! # Design
//! `HttpRestProvider` never talks to the network itself. It asks a
//! `ConnectionFactory` for a `Connection` and drives it through the same
//! sequence for every verb: set method, apply headers, write the body (POST
//! and PUT), read the status, then read either the error stream or the body
//! and headers. Success always yields a `HeaderAndBody`; any status of 300 or
//! above always yields `HttpError`, so callers never branch on the verb.
//!
//! The production factory is backed by `ureq`; tests swap in a scripted
//! connection through `HttpRestProvider::with_factory`.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{HttpError, Result};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response headers: each name maps to one or more values.
pub type HeaderFields = HashMap<String, Vec<String>>;

/// The uniform success result of a transport call.
///
/// Header names are stored as the connection reports them. The ureq
/// transport reports them lowercased (`content-type`), so lookups against
/// real responses use lowercase names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderAndBody {
    body: Vec<u8>,
    headers: HeaderFields,
}

impl HeaderAndBody {
    pub fn new(body: Vec<u8>, headers: HeaderFields) -> Self {
        Self { body, headers }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// First value stored under exactly `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values stored under exactly `name`.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }
}

/// One request/response exchange, driven step by step by the transport.
///
/// The exchange is lazy: nothing is sent until `response_code` is first
/// called, so the method, headers and body must be set before that.
pub trait Connection {
    fn set_request_method(&mut self, method: HttpMethod);

    fn set_request_property(&mut self, name: &str, value: &str);

    /// Sink for the request body.
    fn output_stream(&mut self) -> Result<&mut dyn Write>;

    /// Sends the request if it has not been sent yet and returns the status.
    fn response_code(&mut self) -> Result<u16>;

    /// Declared length of the response body, if the peer sent one.
    fn content_length(&self) -> Option<u64>;

    fn input_stream(&mut self) -> Result<Box<dyn Read + '_>>;

    /// Body of a failed response; `None` when the peer sent nothing.
    fn error_stream(&mut self) -> Option<Box<dyn Read + '_>>;

    fn header_fields(&self) -> HeaderFields;
}

/// Hands out connections for one resource URL.
///
/// PUT and DELETE pass the record id so the factory can target
/// `{base}/{id}`; GET and POST pass `None`.
pub trait ConnectionFactory: Send + Sync {
    fn connection(&self, id: Option<&str>) -> Result<Box<dyn Connection>>;
}

/// Builds a transport for a fully resolved URL.
///
/// Pipes and authentication modules resolve a new URL per call (query
/// parameters, endpoints) and use this to obtain the provider for it.
pub type TransportFactory = Arc<dyn Fn(&Url) -> HttpRestProvider + Send + Sync>;

/// The default `TransportFactory`: ureq-backed connections with `timeout`.
pub fn ureq_transport(timeout: Duration) -> TransportFactory {
    Arc::new(move |url: &Url| HttpRestProvider::new(url.clone(), timeout))
}

/// Appends `id` as a new path segment of `base`.
pub fn resource_url(base: &Url, id: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(id);
    }
    url
}

/// Connection factory that executes exchanges with `ureq`.
#[derive(Debug, Clone)]
pub struct UreqConnectionFactory {
    base_url: Url,
    agent: ureq::Agent,
}

impl UreqConnectionFactory {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        // Status handling belongs to the transport, so 4xx/5xx must come back
        // as responses rather than `Err`.
        // A zero timeout means none at all.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global((!timeout.is_zero()).then_some(timeout))
            .build()
            .new_agent();
        Self { base_url, agent }
    }
}

impl ConnectionFactory for UreqConnectionFactory {
    fn connection(&self, id: Option<&str>) -> Result<Box<dyn Connection>> {
        let url = match id {
            Some(id) => resource_url(&self.base_url, id),
            None => self.base_url.clone(),
        };
        Ok(Box::new(UreqConnection::new(self.agent.clone(), url)))
    }
}

struct UreqConnection {
    agent: ureq::Agent,
    url: Url,
    method: HttpMethod,
    properties: Vec<(String, String)>,
    output: Vec<u8>,
    response: Option<ureq::http::Response<ureq::Body>>,
}

impl UreqConnection {
    fn new(agent: ureq::Agent, url: Url) -> Self {
        Self {
            agent,
            url,
            method: HttpMethod::Get,
            properties: Vec::new(),
            output: Vec::new(),
            response: None,
        }
    }

    fn execute(&self) -> Result<ureq::http::Response<ureq::Body>> {
        let url = self.url.as_str();
        let response = match self.method {
            HttpMethod::Get => with_headers(self.agent.get(url), &self.properties).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), &self.properties).call(),
            HttpMethod::Post => {
                with_headers(self.agent.post(url), &self.properties).send(&self.output[..])
            }
            HttpMethod::Put => {
                with_headers(self.agent.put(url), &self.properties).send(&self.output[..])
            }
        };
        response.map_err(|e| io::Error::other(e).into())
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl Connection for UreqConnection {
    fn set_request_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    fn set_request_property(&mut self, name: &str, value: &str) {
        self.properties.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.properties.push((name.to_string(), value.to_string()));
    }

    fn output_stream(&mut self) -> Result<&mut dyn Write> {
        Ok(&mut self.output)
    }

    fn response_code(&mut self) -> Result<u16> {
        if self.response.is_none() {
            self.response = Some(self.execute()?);
        }
        Ok(self
            .response
            .as_ref()
            .map_or(0, |response| response.status().as_u16()))
    }

    fn content_length(&self) -> Option<u64> {
        self.response
            .as_ref()?
            .headers()
            .get("content-length")?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    fn input_stream(&mut self) -> Result<Box<dyn Read + '_>> {
        self.response_code()?;
        match self.response.as_mut() {
            Some(response) => Ok(Box::new(response.body_mut().as_reader())),
            None => Ok(Box::new(Cursor::new(Vec::new()))),
        }
    }

    fn error_stream(&mut self) -> Option<Box<dyn Read + '_>> {
        let response = self.response.as_mut()?;
        Some(Box::new(response.body_mut().as_reader()))
    }

    fn header_fields(&self) -> HeaderFields {
        let mut fields = HeaderFields::new();
        if let Some(response) = &self.response {
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    fields
                        .entry(name.as_str().to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
        fields
    }
}

/// CRUD transport for one resource URL.
#[derive(Clone)]
pub struct HttpRestProvider {
    factory: Arc<dyn ConnectionFactory>,
    default_headers: Vec<(String, String)>,
}

impl fmt::Debug for HttpRestProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRestProvider")
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl HttpRestProvider {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self::with_factory(Arc::new(UreqConnectionFactory::new(url, timeout)))
    }

    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            default_headers: Vec::new(),
        }
    }

    /// Sets a header sent with every request, replacing an earlier value.
    pub fn set_default_header(&mut self, name: &str, value: &str) {
        self.default_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.default_headers
            .push((name.to_string(), value.to_string()));
    }

    pub fn get(&self) -> Result<HeaderAndBody> {
        self.execute(HttpMethod::Get, None, None)
    }

    pub fn post(&self, body: &[u8]) -> Result<HeaderAndBody> {
        self.execute(HttpMethod::Post, None, Some(body))
    }

    pub fn put(&self, id: &str, body: &[u8]) -> Result<HeaderAndBody> {
        self.execute(HttpMethod::Put, Some(id), Some(body))
    }

    pub fn delete(&self, id: &str) -> Result<HeaderAndBody> {
        self.execute(HttpMethod::Delete, Some(id), None)
    }

    fn execute(
        &self,
        method: HttpMethod,
        id: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<HeaderAndBody> {
        let mut connection = self.factory.connection(id)?;
        // Set even for GET: some connections keep a stale method otherwise.
        connection.set_request_method(method);
        for (name, value) in &self.default_headers {
            connection.set_request_property(name, value);
        }

        if let Some(body) = body {
            let output = connection.output_stream()?;
            output.write_all(body)?;
            output.flush()?;
        }

        let status = connection.response_code()?;
        debug!(%method, id, status, "http exchange completed");

        if status >= 300 {
            let limit = connection.content_length();
            let data = match connection.error_stream() {
                Some(stream) => read_bounded(stream, limit)?,
                None => Vec::new(),
            };
            return Err(HttpError::new(status, data).into());
        }

        let limit = connection.content_length();
        let body = read_bounded(connection.input_stream()?, limit)?;
        Ok(HeaderAndBody::new(body, connection.header_fields()))
    }
}

fn read_bounded(mut stream: Box<dyn Read + '_>, limit: Option<u64>) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    match limit {
        Some(limit) => stream.take(limit).read_to_end(&mut data)?,
        None => stream.read_to_end(&mut data)?,
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;
    use crate::testing::{MockConnection, MockFactory};

    const RESPONSE_DATA: &[u8] = b"12345";
    const REQUEST_DATA: &[u8] = b"12345";

    fn ok_connection() -> MockConnection {
        MockConnection::respond(200, RESPONSE_DATA)
            .with_header("KEY1", "VALUE")
            .with_header("KEY2", "VALUE")
    }

    fn assert_envelope(result: &HeaderAndBody) {
        assert_eq!(result.body(), RESPONSE_DATA);
        assert!(result.header("KEY1").is_some());
        assert_eq!(result.header("KEY2"), Some("VALUE"));
    }

    #[test]
    fn get_fails_with_404() {
        let factory = MockFactory::new(MockConnection::respond(404, RESPONSE_DATA));
        let provider = HttpRestProvider::with_factory(factory.clone());

        let err = provider.get().unwrap_err();
        match err {
            PipeError::Http(http) => {
                assert_eq!(http.status_code(), 404);
                assert_eq!(http.data(), RESPONSE_DATA);
            }
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[test]
    fn redirect_statuses_are_errors() {
        let factory = MockFactory::new(MockConnection::respond(301, b"moved"));
        let provider = HttpRestProvider::with_factory(factory);
        let err = provider.get().unwrap_err();
        assert_eq!(err.as_http().map(HttpError::status_code), Some(301));
    }

    #[test]
    fn missing_error_stream_yields_empty_body() {
        let factory = MockFactory::new(MockConnection::respond(500, b"").without_error_stream());
        let provider = HttpRestProvider::with_factory(factory);
        let err = provider.get().unwrap_err();
        let http = err.as_http().unwrap();
        assert_eq!(http.status_code(), 500);
        assert!(http.data().is_empty());
    }

    #[test]
    fn error_body_is_bounded_by_content_length() {
        let factory =
            MockFactory::new(MockConnection::respond(400, b"short-and-trailing").with_content_length(5));
        let provider = HttpRestProvider::with_factory(factory);
        let err = provider.get().unwrap_err();
        assert_eq!(err.as_http().unwrap().data(), b"short");
    }

    #[test]
    fn get_returns_body_and_headers() {
        let factory = MockFactory::new(ok_connection());
        let provider = HttpRestProvider::with_factory(factory.clone());

        let result = provider.get().unwrap();
        assert_envelope(&result);
        assert_eq!(factory.last_method(), Some(HttpMethod::Get));
        assert_eq!(factory.last_id(), None);
    }

    #[test]
    fn post_writes_body_and_sets_method() {
        let factory = MockFactory::new(ok_connection());
        let provider = HttpRestProvider::with_factory(factory.clone());

        let result = provider.post(REQUEST_DATA).unwrap();
        assert_eq!(factory.last_method(), Some(HttpMethod::Post));
        assert_envelope(&result);
        assert_eq!(factory.last_written(), REQUEST_DATA);
        assert_eq!(factory.last_id(), None);
    }

    #[test]
    fn put_writes_body_and_passes_id() {
        let factory = MockFactory::new(ok_connection());
        let provider = HttpRestProvider::with_factory(factory.clone());

        let result = provider.put("1", REQUEST_DATA).unwrap();
        assert_eq!(factory.last_method(), Some(HttpMethod::Put));
        assert_envelope(&result);
        assert_eq!(factory.last_written(), REQUEST_DATA);
        assert_eq!(factory.last_id().as_deref(), Some("1"));
    }

    #[test]
    fn delete_sets_method_and_passes_id() {
        let factory = MockFactory::new(ok_connection());
        let provider = HttpRestProvider::with_factory(factory.clone());

        let result = provider.delete("1").unwrap();
        assert_envelope(&result);
        assert_eq!(factory.last_method(), Some(HttpMethod::Delete));
        assert_eq!(factory.last_id().as_deref(), Some("1"));
        assert!(factory.last_written().is_empty());
    }

    #[test]
    fn body_is_written_before_status_is_read() {
        let factory = MockFactory::new(ok_connection());
        let provider = HttpRestProvider::with_factory(factory.clone());
        provider.put("7", REQUEST_DATA).unwrap();
        assert!(factory.body_written_before_response());
    }

    #[test]
    fn default_headers_are_applied() {
        let factory = MockFactory::new(ok_connection());
        let mut provider = HttpRestProvider::with_factory(factory.clone());
        provider.set_default_header("Auth-Token", "abc");
        provider.set_default_header("auth-token", "def");

        provider.get().unwrap();
        assert_eq!(
            factory.last_request_headers(),
            vec![("auth-token".to_string(), "def".to_string())]
        );
    }

    #[test]
    fn header_returns_first_of_many_values() {
        let mut headers = HeaderFields::new();
        headers.insert("Set-Cookie".to_string(), vec!["a=1".to_string(), "b=2".to_string()]);
        let envelope = HeaderAndBody::new(Vec::new(), headers);
        assert_eq!(envelope.header("Set-Cookie"), Some("a=1"));
        assert_eq!(envelope.header_values("Set-Cookie").len(), 2);
        assert_eq!(envelope.header("set-cookie"), None);
    }

    #[test]
    fn resource_url_appends_segment() {
        let base = Url::parse("http://localhost:3000/todos").unwrap();
        assert_eq!(resource_url(&base, "42").as_str(), "http://localhost:3000/todos/42");

        let trailing = Url::parse("http://localhost:3000/todos/").unwrap();
        assert_eq!(resource_url(&trailing, "42").as_str(), "http://localhost:3000/todos/42");
    }
}
