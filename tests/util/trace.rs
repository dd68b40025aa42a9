use std::io::IsTerminal;

pub fn trace_init() {
    #[cfg(unix)]
    let color = std::io::stderr().is_terminal();
    #[cfg(not(unix))]
    let color = false;

    let level = std::env::var("TEST_LOG").unwrap_or_else(|_| "debug".to_string());

    redstat::trace::init(color, &level);
}
