//! Service layer shared by the engine and UI clients

mod offline;
mod store;

pub use offline::OfflineService;
pub use store::SyncStore;
