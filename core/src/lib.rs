//! Typed CRUD pipes over HTTP with pluggable authentication.
//!
//! # Overview
//! A pipe binds a record type to the four REST verbs of one collection URL.
//! Requests go through `HttpRestProvider`, which turns every exchange into
//! either a `HeaderAndBody` envelope or an `HttpError`. Authentication
//! modules live in a named `Authenticator` registry and augment each request;
//! a rejected request is retried once after the module logs in again.
//! `BackgroundOperation` runs one pipe call off the caller's thread and
//! replays its outcome on later `start`s until `reset`.
//!
//! # Design
//! - The transport drives an abstract `Connection`, so tests script the peer
//!   while production uses `ureq`.
//! - Modules are built through `Authenticator::auth(..)`, whose builder
//!   registers the module as its final step.
//! - The executor's state machine is guarded by one mutex; outcomes are
//!   cached as `Result<T, Arc<E>>`.

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod pipe;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    AddAuthBuilder, AuthType, AuthenticationModule, Authenticator, AuthorizationFields,
    RestAuthenticationModule,
};
pub use config::{PipeConfig, RestAuthConfig};
pub use error::{HttpError, PipeError, Result};
pub use executor::{
    read_operation, remove_operation, save_operation, BackgroundOperation, Outcome, TaskState,
};
pub use http::{
    Connection, ConnectionFactory, HeaderAndBody, HttpMethod, HttpRestProvider, TransportFactory,
};
pub use pipe::{PipeHandler, ReadFilter, RestRunner};
