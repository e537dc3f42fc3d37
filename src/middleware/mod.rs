pub mod auth;
pub mod errors;
pub mod negotiate;
pub mod response;

pub use auth::{authenticate, extract_credential, Credential};
pub use errors::{normalize_errors, panic_response};
pub use negotiate::negotiate;
pub use response::{ApiResponse, ApiResult};
