//! Debug logging.
//!
//! Logging is opt-in through the `DEBUG` environment variable, using the
//! namespaces JavaScript tooling users already know:
//!
//! ```text
//! DEBUG=vize_chevalet:compile,vize_chevalet:hmr
//! DEBUG=vize_chevalet:*
//! ```
//!
//! Each namespace maps to the tracing target of the same name
//! (`vize_chevalet:hmr` is `vize_chevalet::hmr`). Without `DEBUG` only
//! warnings are printed.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "vize_chevalet";

/// Translate a `DEBUG` value into an `EnvFilter` directive string.
pub fn debug_filter(debug: Option<&str>) -> String {
    let mut directives = vec!["warn".to_string()];
    for namespace in debug.unwrap_or_default().split(',').map(str::trim) {
        let Some(rest) = namespace.strip_prefix(CRATE_TARGET) else {
            continue;
        };
        match rest {
            "" | ":*" | "*" => directives.push(format!("{}=debug", CRATE_TARGET)),
            _ => {
                if let Some(module) = rest.strip_prefix(':') {
                    if !module.is_empty() && module.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        directives.push(format!("{}::{}=debug", CRATE_TARGET, module));
                    }
                }
            }
        }
    }
    directives.join(",")
}

/// Install a stderr subscriber filtered by `DEBUG`. Later calls do nothing.
///
/// Hosts embedding their own subscriber should not call this.
pub fn init_debug_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let debug = std::env::var("DEBUG").ok();
        let filter = EnvFilter::try_new(debug_filter(debug.as_deref()))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_filter() {
        assert_eq!(debug_filter(None), "warn");
        assert_eq!(
            debug_filter(Some("vize_chevalet:compile, vize_chevalet:hmr")),
            "warn,vize_chevalet::compile=debug,vize_chevalet::hmr=debug"
        );
        assert_eq!(debug_filter(Some("vize_chevalet:*")), "warn,vize_chevalet=debug");
        assert_eq!(debug_filter(Some("vite:*,other")), "warn");
        assert_eq!(debug_filter(Some("vize_chevalet:bad=level")), "warn");
    }

    #[test]
    fn test_init_debug_logging_is_idempotent() {
        init_debug_logging();
        init_debug_logging();
    }
}
