use serde::Serialize;

use crate::ast::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A problem found while loading a module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub level: DiagnosticLevel,
    pub span: Option<SourceSpan>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }
}

/// Diagnostics of one module, in the order they were found.
///
/// Errors abort the module and travel in [`crate::LoadError::Syntax`];
/// warnings of a module that loads are kept on its
/// [`crate::ModuleInfo`].
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.push(DiagnosticLevel::Error, span, message.into());
    }

    /// Error at a token position, for failures that have no node yet.
    pub fn error_at(&mut self, line: usize, column: usize, message: impl Into<String>) {
        self.error(SourceSpan::single_point(line, column), message);
    }

    pub fn warning(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.push(DiagnosticLevel::Warning, span, message.into());
    }

    fn push(&mut self, level: DiagnosticLevel, span: SourceSpan, message: String) {
        // spans from synthesized nodes start at line 0
        let span = (span.line > 0).then_some(span);
        self.entries.push(Diagnostic {
            message,
            level,
            span,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}
