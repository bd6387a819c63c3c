//! The reactor thread: socket readiness, the connection table, and signal
//! handling. Parsing and response assembly live in `webserver-http`; the
//! worker pool that runs them lives in `webserver-pool`.

mod conn_table;
mod reactor;
mod signals;

pub use conn_table::{ConnId, ConnTable, MAX_CONNECTIONS};
pub use reactor::{ReactorConfig, ReactorError, run, run_with};
pub use signals::SignalPipe;
