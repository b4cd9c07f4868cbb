//! Authentication modules and the registry that owns them.

pub mod module;
pub mod registry;
pub mod rest;

pub use module::{AuthType, AuthenticationModule, AuthorizationFields};
pub use registry::{AddAuthBuilder, Authenticator, BuilderTable, ModuleConstructor, ModuleSettings};
pub use rest::{RestAuthenticationModule, AUTH_TOKEN_HEADER};
