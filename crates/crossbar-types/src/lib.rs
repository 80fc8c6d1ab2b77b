//! Core types for the Crossbar inter-process command and event router.
//!
//! This crate defines the data structures shared by the routing core and the
//! node binary: the error taxonomy, configuration, and log redaction. It
//! contains no I/O.

pub mod config;
pub mod error;
pub mod redact;

/// Returns `true` when `name` denotes a private command or event.
///
/// Private names start with an underscore and never cross process boundaries.
pub fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_private() {
        assert!(is_private("_secret"));
        assert!(is_private("_"));
        assert!(!is_private("echo"));
        assert!(!is_private("db_query"));
        assert!(!is_private(""));
    }
}
