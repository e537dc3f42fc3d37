pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use record::{Created, Filter, Linkage, Record, RecordDraft, RecordId, RecordRef};
pub use store::{Store, StoreError};
