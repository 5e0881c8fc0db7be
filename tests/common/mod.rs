use std::sync::Once;

static INIT: Once = Once::new();

/// Shared test setup: a roomy coroutine stack and a test-friendly
/// tracing subscriber. Safe to call from every test.
pub fn setup() {
    INIT.call_once(|| {
        may::config().set_stack_size(0x20000);
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
