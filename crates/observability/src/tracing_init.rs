//! Process-wide tracing setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the default subscriber: JSON lines filtered via `RUST_LOG`,
/// falling back to `info`.
///
/// Idempotent: if a subscriber is already installed (a prior call, or a test
/// harness), the call is a no-op.
pub fn init() {
    init_with_default_directive("info");
}

/// [`init`] with an explicit fallback directive for when `RUST_LOG` is
/// unset, e.g. `"rideledger=debug"`.
pub fn init_with_default_directive(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let json_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        // A second install attempt must be swallowed, not panic.
        super::init();
        super::init_with_default_directive("debug");
    }
}
