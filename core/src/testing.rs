//! Scripted connections for unit tests.
//!
//! `MockFactory` hands out clones of pre-built `MockConnection`s (one per
//! exchange, the last one repeating) and records what the transport did with
//! each of them: the id it asked for, the method, headers and body bytes.

use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::error::Result;
use crate::http::{
    Connection, ConnectionFactory, HeaderFields, HttpMethod, HttpRestProvider, TransportFactory,
};

#[derive(Debug, Clone)]
pub struct MockConnection {
    status: u16,
    body: Vec<u8>,
    headers: HeaderFields,
    content_length: Option<u64>,
    has_error_stream: bool,
}

impl MockConnection {
    pub fn respond(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            body: body.to_vec(),
            headers: HeaderFields::new(),
            content_length: None,
            has_error_stream: true,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn without_error_stream(mut self) -> Self {
        self.has_error_stream = false;
        self
    }
}

/// What the transport did with one connection.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub id: Option<String>,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub written: Vec<u8>,
    pub written_before_response: bool,
    pub response_read: bool,
}

#[derive(Default)]
struct Script {
    responses: VecDeque<MockConnection>,
    exchanges: Vec<Arc<Mutex<Exchange>>>,
    urls: Vec<String>,
}

#[derive(Clone)]
pub struct MockFactory {
    script: Arc<Mutex<Script>>,
}

impl MockFactory {
    pub fn new(response: MockConnection) -> Arc<Self> {
        Self::sequence(vec![response])
    }

    /// Serves `responses` in order; the last one answers every later call.
    pub fn sequence(responses: Vec<MockConnection>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(Script {
                responses: responses.into(),
                ..Script::default()
            })),
        })
    }

    /// A `TransportFactory` whose providers all draw from this script.
    pub fn transport(self: &Arc<Self>) -> TransportFactory {
        let factory = Arc::clone(self);
        Arc::new(move |url: &Url| {
            factory.script.lock().urls.push(url.to_string());
            HttpRestProvider::with_factory(factory.clone())
        })
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.script
            .lock()
            .exchanges
            .iter()
            .map(|exchange| exchange.lock().clone())
            .collect()
    }

    /// URLs handed to providers created through `transport`.
    pub fn urls(&self) -> Vec<String> {
        self.script.lock().urls.clone()
    }

    fn last(&self) -> Option<Exchange> {
        self.exchanges().pop()
    }

    pub fn last_method(&self) -> Option<HttpMethod> {
        self.last().map(|exchange| exchange.method)
    }

    pub fn last_id(&self) -> Option<String> {
        self.last().and_then(|exchange| exchange.id)
    }

    pub fn last_written(&self) -> Vec<u8> {
        self.last().map(|exchange| exchange.written).unwrap_or_default()
    }

    pub fn last_request_headers(&self) -> Vec<(String, String)> {
        self.last().map(|exchange| exchange.headers).unwrap_or_default()
    }

    pub fn body_written_before_response(&self) -> bool {
        self.last()
            .is_some_and(|exchange| exchange.written_before_response)
    }
}

impl ConnectionFactory for MockFactory {
    fn connection(&self, id: Option<&str>) -> Result<Box<dyn Connection>> {
        let mut script = self.script.lock();
        let response = if script.responses.len() > 1 {
            script.responses.pop_front()
        } else {
            script.responses.front().cloned()
        }
        .unwrap_or_else(|| MockConnection::respond(200, b""));

        let exchange = Arc::new(Mutex::new(Exchange {
            id: id.map(str::to_string),
            ..Exchange::default()
        }));
        script.exchanges.push(Arc::clone(&exchange));
        Ok(Box::new(RecordingConnection {
            response,
            exchange,
            output: RecordingWriter::default(),
        }))
    }
}

#[derive(Default)]
struct RecordingWriter {
    bytes: Vec<u8>,
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct RecordingConnection {
    response: MockConnection,
    exchange: Arc<Mutex<Exchange>>,
    output: RecordingWriter,
}

impl Connection for RecordingConnection {
    fn set_request_method(&mut self, method: HttpMethod) {
        self.exchange.lock().method = method;
    }

    fn set_request_property(&mut self, name: &str, value: &str) {
        self.exchange
            .lock()
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn output_stream(&mut self) -> Result<&mut dyn Write> {
        Ok(&mut self.output)
    }

    fn response_code(&mut self) -> Result<u16> {
        let mut exchange = self.exchange.lock();
        if !exchange.response_read {
            exchange.response_read = true;
            exchange.written = self.output.bytes.clone();
            exchange.written_before_response = !self.output.bytes.is_empty();
        }
        Ok(self.response.status)
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_length
    }

    fn input_stream(&mut self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.response.body.clone())))
    }

    fn error_stream(&mut self) -> Option<Box<dyn Read + '_>> {
        if self.response.has_error_stream {
            Some(Box::new(Cursor::new(self.response.body.clone())))
        } else {
            None
        }
    }

    fn header_fields(&self) -> HeaderFields {
        self.response.headers.clone()
    }
}
