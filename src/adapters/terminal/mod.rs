//! Trading terminal adapters.

mod http_source;

pub use http_source::{HttpTerminalSource, TerminalSourceConfig};
