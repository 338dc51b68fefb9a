pub mod handler;
pub mod memory_store;
pub mod queue;
pub mod sheets_sync;
pub mod worker;
