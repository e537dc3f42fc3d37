//! Route table synthesis.
//!
//! The table is derived once from the registry and the resource modules and
//! never changes afterwards. Each descriptor contributes its generic CRUD and
//! relationship bindings; explicit endpoints from resource modules replace a
//! generic binding with the same method and path, or add new ones.

use axum::{
    extract::OriginalUri,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, MethodRouter},
    Router,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
};

use crate::api::API_PREFIX;
use crate::config::SecurityConfig;
use crate::error::ApiError;
use crate::handlers::{generic, relationships, resource_modules, status, GenericOps, ResourceModule};
use crate::middleware::{authenticate, negotiate, normalize_errors, panic_response};
use crate::schema::{Registry, RegistryError, ResourceDescriptor};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Generic,
    Relationship,
    Explicit,
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteSource::Generic => "generic",
            RouteSource::Relationship => "relationship",
            RouteSource::Explicit => "explicit",
        };
        f.write_str(name)
    }
}

/// One (method, path) pair and the handler serving it
pub struct RouteBinding {
    pub method: Method,
    /// Path relative to the API prefix
    pub path: String,
    pub source: RouteSource,
    handler: MethodRouter<AppState>,
}

impl fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBinding")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug)]
pub struct RouteTable {
    bindings: Vec<RouteBinding>,
}

impl RouteTable {
    pub fn build(registry: &Registry, modules: Vec<ResourceModule>) -> Result<Self, RegistryError> {
        let mut by_resource: BTreeMap<&'static str, ResourceModule> = BTreeMap::new();
        for module in modules {
            if registry.get(module.resource).is_none() {
                return Err(RegistryError::Invalid(format!(
                    "resource module '{}' has no schema entry",
                    module.resource
                )));
            }
            by_resource.insert(module.resource, module);
        }

        let mut table = Self { bindings: Vec::new() };
        for descriptor in registry.iter() {
            let module = by_resource.remove(descriptor.name.as_str());
            let ops = module.as_ref().map_or(GenericOps::ALL, |m| m.generic);
            table.add_generic(Arc::new(descriptor.clone()), ops);

            let collection = format!("/{}", descriptor.collection());
            for endpoint in module.into_iter().flat_map(|m| m.endpoints) {
                table.bind(RouteBinding {
                    method: endpoint.method,
                    path: format!("{}{}", collection, endpoint.suffix),
                    source: RouteSource::Explicit,
                    handler: endpoint.handler,
                });
            }
        }
        Ok(table)
    }

    fn add_generic(&mut self, descriptor: Arc<ResourceDescriptor>, ops: GenericOps) {
        let collection = format!("/{}", descriptor.collection());
        let member = format!("{}/:id", collection);

        if ops.create {
            self.push(Method::POST, &collection, RouteSource::Generic, generic::create(descriptor.clone()));
        }
        if ops.read {
            self.push(Method::GET, &member, RouteSource::Generic, generic::read(descriptor.clone()));
        }
        if ops.update {
            self.push(Method::PATCH, &member, RouteSource::Generic, generic::update(descriptor.clone()));
        }
        if ops.destroy {
            self.push(Method::DELETE, &member, RouteSource::Generic, generic::destroy(descriptor.clone()));
        }

        for relation in &descriptor.relations {
            let path = format!("{}/relationships/{}", member, relation.name);
            if ops.read {
                self.push(
                    Method::GET,
                    &path,
                    RouteSource::Relationship,
                    relationships::read(descriptor.clone(), relation),
                );
            }
            if !ops.link {
                continue;
            }
            self.push(
                Method::PATCH,
                &path,
                RouteSource::Relationship,
                relationships::replace(descriptor.clone(), relation),
            );
            if relation.is_to_many() {
                self.push(
                    Method::POST,
                    &path,
                    RouteSource::Relationship,
                    relationships::add(descriptor.clone(), relation),
                );
                self.push(
                    Method::DELETE,
                    &path,
                    RouteSource::Relationship,
                    relationships::remove(descriptor.clone(), relation),
                );
            }
        }
    }

    fn push(&mut self, method: Method, path: &str, source: RouteSource, handler: MethodRouter<AppState>) {
        self.bindings.push(RouteBinding {
            method,
            path: path.to_string(),
            source,
            handler,
        });
    }

    /// Add a binding, replacing any with the same method and path
    fn bind(&mut self, binding: RouteBinding) {
        match self
            .bindings
            .iter_mut()
            .find(|b| b.method == binding.method && b.path == binding.path)
        {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
    }

    pub fn routes(&self) -> &[RouteBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Method routers merged per path
    pub fn into_router(self) -> Router<AppState> {
        let mut paths: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
        for binding in self.bindings {
            tracing::debug!("Route {} {} ({})", binding.method, binding.path, binding.source);
            let handler = match paths.remove(&binding.path) {
                Some(existing) => existing.merge(binding.handler),
                None => binding.handler,
            };
            paths.insert(binding.path, handler);
        }

        paths
            .into_iter()
            .fold(Router::new(), |router, (path, handler)| router.route(&path, handler))
    }
}

async fn unmatched(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found(format!("No route for {} {}", method, uri.path()))
}

/// Build the route table for the state's registry and assemble the app
pub fn build_app(state: AppState) -> Result<Router, RegistryError> {
    let table = RouteTable::build(&state.registry, resource_modules())?;
    tracing::info!("Route table built with {} bindings", table.len());
    Ok(app(state, table))
}

/// Request pipeline: errors > negotiation > authentication > dispatch
pub fn app(state: AppState, table: RouteTable) -> Router {
    let api = table
        .into_router()
        .fallback(unmatched)
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn(negotiate));

    Router::new()
        .route("/", get(status::root))
        .route("/health", get(status::health))
        .nest(API_PREFIX, api)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(normalize_errors))
        .with_state(state)
}

/// CORS from the security config; `*` or an empty list allows any origin
pub fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}
