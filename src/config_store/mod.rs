//! Thread-safe store of live configuration instances.
//!
//! Holds at most one instance per schema type. Instances are replaced
//! wholesale, so readers only ever observe complete, validated values.

mod entry;
mod store;


pub use entry::StoredConfig;
pub use store::ConfigStore;
