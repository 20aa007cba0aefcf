//! Dev-server log classification.
//!
//! The log file is the only window into the dev server's health; these
//! helpers pick error- and warning-shaped lines out of it and parse the
//! framework's `Local: http://localhost:NNNN` readiness line.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|failed|cannot find|exception|fatal|unhandled)\b").unwrap()
    })
}

fn warning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bwarn(ing)?\b").unwrap())
}

fn local_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Local:\s+https?://localhost:(\d+)").unwrap())
}

/// Classify one log line. Error patterns win over warning patterns.
pub fn classify_line(line: &str) -> Option<LogLevel> {
    if error_re().is_match(line) {
        Some(LogLevel::Error)
    } else if warning_re().is_match(line) {
        Some(LogLevel::Warning)
    } else {
        None
    }
}

/// The error-shaped subset of a log tail.
pub fn error_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| classify_line(l) == Some(LogLevel::Error))
        .cloned()
        .collect()
}

/// Parse the port out of the framework's `Local: http://localhost:NNNN`
/// readiness line. Used only as a fallback on the start path; the port
/// scan stays authoritative.
pub fn parse_local_url_port(log: &str) -> Option<u16> {
    local_url_re()
        .captures_iter(log)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_lines() {
        assert_eq!(
            classify_line("Error: Cannot find module 'next'"),
            Some(LogLevel::Error)
        );
        assert_eq!(
            classify_line("Build failed with 2 errors"),
            Some(LogLevel::Error)
        );
    }

    #[test]
    fn classifies_warning_lines() {
        assert_eq!(
            classify_line("warn  - Fast Refresh had to perform a full reload"),
            Some(LogLevel::Warning)
        );
    }

    #[test]
    fn plain_lines_are_unclassified() {
        assert_eq!(classify_line("✓ Ready in 1.2s"), None);
        assert_eq!(classify_line("GET / 200 in 45ms"), None);
    }

    #[test]
    fn parses_local_url() {
        let log = "  ▲ Next.js 15.0.0\n  - Local: http://localhost:3001\n ✓ Ready";
        assert_eq!(parse_local_url_port(log), Some(3001));
    }

    #[test]
    fn last_local_line_wins() {
        let log = "Local: http://localhost:3000\nrestarting...\nLocal: http://localhost:3002\n";
        assert_eq!(parse_local_url_port(log), Some(3002));
    }

    #[test]
    fn no_local_line_is_none() {
        assert_eq!(parse_local_url_port("compiling..."), None);
    }
}
