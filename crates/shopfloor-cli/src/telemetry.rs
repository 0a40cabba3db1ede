//! Console logging for the `shopfloor` binary.
//!
//! Installs a `tracing` registry with an [`EnvFilter`] (from `RUST_LOG`,
//! defaulting to `info`) and a single `fmt` layer, either human-readable or
//! JSON lines. The library logs through the same registry once its
//! `tracing` feature is enabled.
//!
//! ```bash
//! RUST_LOG=shopfloor=debug cargo run -p shopfloor-cli -- --num-workers 4
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let timer = tracing_subscriber::fmt::time::ChronoLocal::rfc_3339();

    let pretty = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(timer.clone())
            .with_file(true)
            .pretty()
    });

    let lines = json.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_timer(timer)
            .json()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(lines)
        .try_init()?;

    Ok(())
}
