//! Tracing subscriber setup shared by relay binaries.

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count when `RUST_LOG` is not set.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "relay=info,warn",
        1 => "relay=debug,info",
        _ => "relay=trace,debug",
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` takes precedence over
/// `verbosity`. Calling this twice is harmless.
pub fn init(verbosity: u8) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert!(default_directive(0).contains("info"));
        assert!(default_directive(1).starts_with("relay=debug"));
        assert!(default_directive(5).starts_with("relay=trace"));
    }

    #[test]
    fn test_directives_parse() {
        for v in 0..3 {
            assert!(EnvFilter::try_new(default_directive(v)).is_ok());
        }
    }
}
