//! Diagnostic records for the compiler
//!
//! A `Diagnostic` is the uniform `{ severity, location, message }` record
//! spec'd for the external interface: the compiler never panics or bails
//! out of a pass on the first problem it finds (outside of genuine internal
//! assertion failures), it buffers records here and keeps going until a
//! structured recovery point.

use crate::token::SourceLocation;
use std::fmt;

/// How serious a diagnostic is.
///
/// `Error` does not stop compilation outright; it just guarantees a
/// non-zero process exit. `Fatal` additionally halts the current pass at
/// its next recovery point and skips every downstream pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            location,
            message: message.into(),
        }
    }

    pub fn fatal(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Fatal,
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Accumulates diagnostics across the whole pipeline and tracks whether a
/// fatal error has been seen, so callers know to stop running passes.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    records: Vec<Diagnostic>,
    has_fatal: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.records.push(Diagnostic::error(location, message));
    }

    pub fn fatal(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.records.push(Diagnostic::fatal(location, message));
        self.has_fatal = true;
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.has_fatal
    }

    /// True iff any diagnostic (fatal or not) was emitted; process exit
    /// code must be non-zero in that case per spec.md section 6.
    pub fn has_errors(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Diagnostic> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sets_flag_error_does_not() {
        let mut sink = DiagnosticSink::new();
        sink.error(SourceLocation::BAD, "just an error");
        assert!(!sink.has_fatal_errors());
        assert!(sink.has_errors());

        sink.fatal(SourceLocation::BAD, "stop everything");
        assert!(sink.has_fatal_errors());
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn display_format() {
        let loc = SourceLocation::new(0, 3, 5);
        let d = Diagnostic::error(loc, "use of uninitialized variable `x`");
        let text = d.to_string();
        assert!(text.contains("error"));
        assert!(text.contains("use of uninitialized variable `x`"));
    }
}
