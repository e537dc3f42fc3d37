pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod schema;
pub mod services;
pub mod state;
pub mod sync;
pub mod transcode;
pub mod upload;

pub use error::ApiError;
pub use router::{app, build_app, RouteTable};
pub use state::AppState;
