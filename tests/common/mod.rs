// tests/common/mod.rs
use std::sync::Once;

static INIT: Once = Once::new();

#[allow(dead_code)]
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("stream_ingest=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}
