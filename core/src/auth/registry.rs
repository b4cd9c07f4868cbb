//! Named registry of authentication modules and its build-then-register
//! builder.
//!
//! # Design
//! `Authenticator::auth` looks the requested `AuthType` up in a
//! `BuilderTable` of constructor functions instead of matching on the type,
//! so adding a module kind means registering one more constructor. The
//! returned `AddAuthBuilder` is bound to the registry and the entry name;
//! its terminal `add` builds the module and stores it in a single step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::auth::module::{AuthType, AuthenticationModule};
use crate::auth::rest::RestAuthenticationModule;
use crate::config::{duration_to_millis, RestAuthConfig};
use crate::error::{PipeError, Result};
use crate::http::{ureq_transport, TransportFactory};

/// Everything a constructor needs to build one module.
#[derive(Clone)]
pub struct ModuleSettings {
    pub base_url: Url,
    pub config: RestAuthConfig,
    /// Overrides the default ureq transport.
    pub transport: Option<TransportFactory>,
}

impl fmt::Debug for ModuleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSettings")
            .field("base_url", &self.base_url.as_str())
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

pub type ModuleConstructor = fn(ModuleSettings) -> Result<Arc<dyn AuthenticationModule>>;

/// Maps each supported `AuthType` to the constructor of its module.
#[derive(Debug, Clone)]
pub struct BuilderTable {
    constructors: HashMap<AuthType, ModuleConstructor>,
}

impl Default for BuilderTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(AuthType::Rest, build_rest_module);
        table
    }
}

impl BuilderTable {
    /// A table that supports no auth type at all.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, auth_type: AuthType, constructor: ModuleConstructor) {
        self.constructors.insert(auth_type, constructor);
    }

    pub fn get(&self, auth_type: AuthType) -> Option<ModuleConstructor> {
        self.constructors.get(&auth_type).copied()
    }
}

fn build_rest_module(settings: ModuleSettings) -> Result<Arc<dyn AuthenticationModule>> {
    let transport = settings
        .transport
        .unwrap_or_else(|| ureq_transport(settings.config.timeout()));
    Ok(Arc::new(RestAuthenticationModule::with_transport(
        settings.base_url,
        settings.config,
        transport,
    )))
}

/// Registry of authentication modules keyed by name.
#[derive(Debug, Default)]
pub struct Authenticator {
    modules: RwLock<HashMap<String, Arc<dyn AuthenticationModule>>>,
    builders: BuilderTable,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builders(builders: BuilderTable) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            builders,
        }
    }

    /// Stores `module` under `name`, replacing any earlier entry, and returns
    /// the stored instance.
    pub fn add(
        &self,
        name: &str,
        module: Arc<dyn AuthenticationModule>,
    ) -> Arc<dyn AuthenticationModule> {
        let previous = self
            .modules
            .write()
            .insert(name.to_string(), Arc::clone(&module));
        debug!(name, replaced = previous.is_some(), "authentication module added");
        module
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthenticationModule>> {
        self.modules.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn AuthenticationModule>> {
        let removed = self.modules.write().remove(name);
        debug!(name, found = removed.is_some(), "authentication module removed");
        removed
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Starts building a module of `auth_type` that `add` will register as
    /// `name`.
    ///
    /// Fails with `InvalidArgument` when no constructor is registered for
    /// `auth_type`; nothing is registered in that case.
    pub fn auth(&self, auth_type: AuthType, name: &str, base_url: Url) -> Result<AddAuthBuilder<'_>> {
        let constructor = self.builders.get(auth_type).ok_or_else(|| {
            PipeError::InvalidArgument(format!("unsupported auth type: {auth_type:?}"))
        })?;
        Ok(AddAuthBuilder {
            registry: self,
            name: name.to_string(),
            constructor,
            settings: ModuleSettings {
                base_url,
                config: RestAuthConfig::default(),
                transport: None,
            },
        })
    }
}

/// Fluent module configuration bound to a registry entry name.
pub struct AddAuthBuilder<'a> {
    registry: &'a Authenticator,
    name: String,
    constructor: ModuleConstructor,
    settings: ModuleSettings,
}

impl fmt::Debug for AddAuthBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddAuthBuilder")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AddAuthBuilder<'_> {
    pub fn login_endpoint(mut self, endpoint: &str) -> Self {
        self.settings.config.login_endpoint = endpoint.to_string();
        self
    }

    pub fn logout_endpoint(mut self, endpoint: &str) -> Self {
        self.settings.config.logout_endpoint = endpoint.to_string();
        self
    }

    pub fn enroll_endpoint(mut self, endpoint: &str) -> Self {
        self.settings.config.enroll_endpoint = endpoint.to_string();
        self
    }

    pub fn config(mut self, config: RestAuthConfig) -> Self {
        self.settings.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.config.timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn transport(mut self, transport: TransportFactory) -> Self {
        self.settings.transport = Some(transport);
        self
    }

    /// Builds the module and registers it under the bound name.
    pub fn add(self) -> Result<Arc<dyn AuthenticationModule>> {
        let module = (self.constructor)(self.settings)?;
        Ok(self.registry.add(&self.name, module))
    }

    /// Like `add`, returning the module as its concrete type `M`.
    ///
    /// The module is registered even when the cast fails.
    pub fn add_as<M>(self) -> Result<Arc<M>>
    where
        M: AuthenticationModule + 'static,
    {
        let name = self.name.clone();
        self.add()?.into_any().downcast::<M>().map_err(|_| {
            PipeError::InvalidArgument(format!(
                "module '{name}' is not a {}",
                std::any::type_name::<M>()
            ))
        })
    }
}
