// handlers/mod.rs - Resource modules and the handlers behind the route table
//
// Every registered resource gets the generic CRUD and relationship handlers
// unless a resource module below narrows them. Modules also contribute
// explicit (method, path suffix, handler) endpoints that take precedence over
// a generic binding on the same method and path.

use axum::{http::Method, routing::MethodRouter};

use crate::state::AppState;

pub mod documents;
pub mod generic;
pub mod relationships;
pub mod snapshots;
pub mod status;
pub mod users;

/// Which generic operations a resource exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericOps {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub destroy: bool,
    /// Relationship PATCH/POST/DELETE; relationship GET follows `read`
    pub link: bool,
}

impl GenericOps {
    pub const ALL: Self = Self {
        create: true,
        read: true,
        update: true,
        destroy: true,
        link: true,
    };

    pub const READ_ONLY: Self = Self {
        create: false,
        read: true,
        update: false,
        destroy: false,
        link: false,
    };
}

/// Hand-written endpoint relative to the resource collection path
pub struct Endpoint {
    pub method: Method,
    /// Appended to `/{collection}`, e.g. `""` or `"/:id/snapshots"`
    pub suffix: &'static str,
    pub handler: MethodRouter<AppState>,
}

impl Endpoint {
    pub fn new(method: Method, suffix: &'static str, handler: MethodRouter<AppState>) -> Self {
        Self {
            method,
            suffix,
            handler,
        }
    }
}

pub struct ResourceModule {
    pub resource: &'static str,
    pub generic: GenericOps,
    pub endpoints: Vec<Endpoint>,
}

/// Modules for the resources with hand-written behavior
pub fn resource_modules() -> Vec<ResourceModule> {
    vec![documents::module(), snapshots::module(), users::module()]
}
