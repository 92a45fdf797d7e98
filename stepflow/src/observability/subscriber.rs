//! Tracing subscriber initialisation.
//!
//! The engine itself only emits `tracing` events; applications pick how to
//! render them. These helpers install a global subscriber filtered by
//! `RUST_LOG`, falling back to the given directive.

use crate::errors::StepflowError;
use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static TEST_TRACING: Once = Once::new();

fn env_filter(default_directive: &str) -> Result<EnvFilter, StepflowError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            StepflowError::InvalidConfiguration(format!(
                "invalid log filter '{default_directive}': {e}"
            ))
        }),
    }
}

/// Installs a human readable subscriber.
///
/// Fails if the directive does not parse or a global subscriber is already
/// installed.
pub fn init_tracing(default_directive: &str) -> Result<(), StepflowError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(env_filter(default_directive)?)
        .try_init()
        .map_err(|e| StepflowError::Internal(format!("tracing already initialised: {e}")))
}

/// Installs a subscriber that writes one JSON object per event.
pub fn init_json_tracing(default_directive: &str) -> Result<(), StepflowError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .with(env_filter(default_directive)?)
        .try_init()
        .map_err(|e| StepflowError::Internal(format!("tracing already initialised: {e}")))
}

/// Routes events to the test harness output. Safe to call from every test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}
