//! # Error Report
//!
//! Accumulates human-readable rejection messages for one discovery cycle.
//! The report is the only channel through which partial failures (rejected
//! fields, dropped entities, naming conflicts) become visible to the user.

use std::fmt;

/// Messages appended while reconciling, one line each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    lines: Vec<String>,
}

impl ErrorReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. A trailing newline is not required.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.lines
            .push(message.trim_end_matches('\n').to_string());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Whether any message contains `needle`.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl fmt::Display for ErrorReport {
    /// Newline-terminated lines, the format stored on the discovery rule.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_newline_terminated_lines() {
        let mut report = ErrorReport::new();
        report.push("Cannot create item: value \"x\" is too long.\n");
        report.push("second");
        assert_eq!(
            report.to_string(),
            "Cannot create item: value \"x\" is too long.\nsecond\n"
        );
        assert_eq!(report.len(), 2);
        assert!(report.mentions("too long"));
    }

    #[test]
    fn empty_report_renders_nothing() {
        assert_eq!(ErrorReport::new().to_string(), "");
    }
}
