use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the `log` backend once per test binary, the same one-shot
/// pattern the teacher's own integration tests use so every test can call
/// this unconditionally without double-initializing.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
