//! Infrastructure adapters: HTTP sources, sheet parsing, identifier lists
//! and in-memory sinks.

pub mod http;
pub mod identifiers;
pub mod memory;
pub mod sheets;

pub use http::HttpSources;
pub use identifiers::{JsonFileIdentifiers, StaticIdentifiers};
pub use memory::InMemorySink;
