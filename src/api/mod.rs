pub mod body;
pub mod format;
pub mod media;

pub use body::JsonBody;
pub use format::{API_PREFIX, JSONAPI_MEDIA_TYPE};
