//! Observability utilities.

mod subscriber;
mod timer;

pub use subscriber::{init_json_tracing, init_test_tracing, init_tracing};
pub use timer::SpanTimer;
