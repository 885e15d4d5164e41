use crate::span::Span;

/// One named source file of a compilation. Its position in the source list
/// handed to the pipeline is the `file_id` carried by every [`Span`], so a
/// diagnostic can always find the text it points into.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A fatal compiler diagnostic. The compiler has no warnings: every
/// diagnostic aborts the stage that produced it, so there is no severity to
/// carry, only the message, where it happened, and an optional hint.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render to stderr with ariadne, against whichever source file the
    /// span's `file_id` selects. A diagnostic with no source to point into
    /// (a whole-program error such as a missing `main`) degrades to a plain
    /// line.
    pub fn render(&self, sources: &[SourceFile]) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let source = match sources.get(self.span.file_id as usize) {
            Some(source) => source,
            None => {
                eprintln!("error: {}", self.message);
                if let Some(help) = &self.help {
                    eprintln!("help: {}", help);
                }
                return;
            }
        };

        let filename = source.name.as_str();
        let mut report = Report::build(ReportKind::Error, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            );

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if report
            .finish()
            .eprint((filename, Source::from(&source.text)))
            .is_err()
        {
            eprintln!("error: {}", self.message);
        }
    }
}

/// Render a stage's diagnostics against the compilation's sources.
pub fn render_diagnostics(diagnostics: &[Diagnostic], sources: &[SourceFile]) {
    for diag in diagnostics {
        diag.render(sources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::error("type mismatch".to_string(), span);
        assert_eq!(d.message, "type mismatch");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.help.is_none());
    }

    #[test]
    fn test_with_help() {
        let d = Diagnostic::error("unknown function '@cast'".to_string(), Span::dummy())
            .with_help("casts are spelled @cast_<type>(value)".to_string());
        assert_eq!(
            d.help.as_deref(),
            Some("casts are spelled @cast_<type>(value)")
        );
    }

    #[test]
    fn test_span_merge_same_file() {
        let a = Span::new(0, 4, 9);
        let b = Span::new(0, 12, 20);
        let m = a.merge(b);
        assert_eq!(m.start, 4);
        assert_eq!(m.end, 20);
    }

    #[test]
    fn test_span_merge_cross_file_keeps_left() {
        let a = Span::new(0, 4, 9);
        let b = Span::new(1, 12, 20);
        let m = a.merge(b);
        assert_eq!(m.file_id, 0);
        assert_eq!(m.end, 9);
    }

    #[test]
    fn test_render_selects_file_by_id() {
        let sources = vec![
            SourceFile::new("main.barely", "function main() : () { }\n"),
            SourceFile::new("lib.barely", "constant N : integer = true;\n"),
        ];
        let d = Diagnostic::error(
            "constant 'N' is declared 'integer' but its value is 'boolean'".to_string(),
            Span::new(1, 23, 27),
        );
        // Renders against lib.barely without panicking.
        d.render(&sources);
    }

    #[test]
    fn test_render_without_matching_source() {
        // file_id past the source list: a whole-program diagnostic.
        let d = Diagnostic::error("no 'main' function".to_string(), Span::new(7, 0, 0))
            .with_help("declare `function main() : () { ... }`".to_string());
        d.render(&[]);
    }

    #[test]
    fn test_render_list() {
        let sources = vec![SourceFile::new(
            "test.barely",
            "variable x : integer = true;\n",
        )];
        let diagnostics = vec![
            Diagnostic::error("first".to_string(), Span::new(0, 9, 10)),
            Diagnostic::error("second".to_string(), Span::new(0, 23, 27)),
        ];
        render_diagnostics(&diagnostics, &sources);
    }
}
