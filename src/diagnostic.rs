use std::fmt;

use crate::span::Span;

/// What went wrong, independent of the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Two types have no common supertype, or a value does not fit a type.
    TypeMismatch,
    /// A leaf value has no representable type.
    UnsupportedValue,
    InvalidFunctionPrototype,
    InvalidKernelRequestType,
    InvalidErrorMode,
    InvalidAccessMode,
    /// A type needs out-of-band metadata and none was supplied.
    MetadataMismatch,
    ShapeMismatch,
    AxisOutOfBounds,
    EmptyReductionNoIdentity,
    /// A raw-pointer view was requested for a type carrying metadata.
    UnsupportedMetadata,
    /// A checked scalar conversion lost information.
    ConversionError,
    IndexOutOfBounds,
    AmbiguousTruthValue,
    ReadOnly,
    ForeignCallFailed,
    Syntax,
    Config,
}

impl ErrorCode {
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::UnsupportedValue => "UnsupportedValue",
            ErrorCode::InvalidFunctionPrototype => "InvalidFunctionPrototype",
            ErrorCode::InvalidKernelRequestType => "InvalidKernelRequestType",
            ErrorCode::InvalidErrorMode => "InvalidErrorMode",
            ErrorCode::InvalidAccessMode => "InvalidAccessMode",
            ErrorCode::MetadataMismatch => "MetadataMismatch",
            ErrorCode::ShapeMismatch => "ShapeMismatch",
            ErrorCode::AxisOutOfBounds => "AxisOutOfBounds",
            ErrorCode::EmptyReductionNoIdentity => "EmptyReductionNoIdentity",
            ErrorCode::UnsupportedMetadata => "UnsupportedMetadata",
            ErrorCode::ConversionError => "ConversionError",
            ErrorCode::IndexOutOfBounds => "IndexOutOfBounds",
            ErrorCode::AmbiguousTruthValue => "AmbiguousTruthValue",
            ErrorCode::ReadOnly => "ReadOnly",
            ErrorCode::ForeignCallFailed => "ForeignCallFailed",
            ErrorCode::Syntax => "Syntax",
            ErrorCode::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error or warning produced by inference, kernel construction or the CLI.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    /// Location in the literal or type text, when the problem came from parsed input.
    pub span: Option<Span>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: String) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message,
            span: None,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(code: ErrorCode, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message,
            span: None,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Render the diagnostic to stderr. Spanned diagnostics go through ariadne;
    /// the rest are printed as plain `error:` / `warning:` lines.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let Some(span) = self.span.filter(|s| s.text(source).is_some()) else {
            self.render_plain();
            return;
        };

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, span.start as usize)
            .with_code(self.code.name())
            .with_message(&self.message)
            .with_label(
                Label::new((filename, span.range()))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if report
            .finish()
            .eprint((filename, Source::from(source)))
            .is_err()
        {
            self.render_plain();
        }
    }

    fn render_plain(&self) {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{}[{}]: {}", prefix, self.code, self.message);
        for note in &self.notes {
            eprintln!("  = note: {}", note);
        }
        if let Some(help) = &self.help {
            eprintln!("  = help: {}", help);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        for note in &self.notes {
            write!(f, " ({})", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}
