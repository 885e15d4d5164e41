use crate::diagnostic::Diagnostic;
use crate::lexeme::{Keyword, Lexeme};
use crate::span::{Span, Spanned};

/// Scanner for Barely source text.
///
/// A running buffer accumulates non-delimiter characters; every delimiter
/// flushes the buffer through [`classify`]. The delimiter set is space and
/// the punctuation characters; tabs and newlines are transparent (neither
/// buffered nor flushing), so a name may span a line break.
pub struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    tokens: Vec<Spanned<Lexeme>>,
    buffer: String,
    buffer_start: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            tokens: Vec::new(),
            buffer: String::new(),
            buffer_start: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        while self.pos < self.source.len() {
            let ch = self.source[self.pos];
            match ch {
                b' ' => self.flush_buffer(),
                b'(' => self.flush_and_emit(Lexeme::OpenParen),
                b')' => self.flush_and_emit(Lexeme::CloseParen),
                b'{' => self.flush_and_emit(Lexeme::OpenBrace),
                b'}' => self.flush_and_emit(Lexeme::CloseBrace),
                b';' => self.flush_and_emit(Lexeme::Semicolon),
                b':' => self.flush_and_emit(Lexeme::Colon),
                b',' => self.flush_and_emit(Lexeme::Comma),
                b'"' => {
                    self.flush_buffer();
                    self.scan_string();
                }
                b'\t' | b'\n' | b'\r' => {}
                _ => {
                    if self.buffer.is_empty() {
                        self.buffer_start = self.pos;
                    }
                    self.buffer.push(ch as char);
                }
            }
            self.pos += 1;
        }
        self.flush_buffer();
        self.tokens.push(Spanned::new(
            Lexeme::Eof,
            Span::new(self.file_id, self.pos as u32, self.pos as u32),
        ));
        (self.tokens, self.diagnostics)
    }

    /// Collect characters until the closing quote. All delimiter rules are
    /// suspended inside the quotes. `self.pos` is on the opening quote on
    /// entry and is left on the closing quote (or past the end).
    fn scan_string(&mut self) {
        let start = self.pos;
        let mut text = String::new();
        self.pos += 1;
        while self.pos < self.source.len() && self.source[self.pos] != b'"' {
            text.push(self.source[self.pos] as char);
            self.pos += 1;
        }
        if self.pos >= self.source.len() {
            self.diagnostics.push(
                Diagnostic::error(
                    "unterminated string literal".to_string(),
                    Span::new(self.file_id, start as u32, self.pos as u32),
                )
                .with_help("every '\"' must have a matching closing '\"'".to_string()),
            );
        }
        let end = (self.pos + 1).min(self.source.len());
        self.tokens.push(Spanned::new(
            Lexeme::String(text),
            Span::new(self.file_id, start as u32, end as u32),
        ));
    }

    fn flush_and_emit(&mut self, token: Lexeme) {
        self.flush_buffer();
        self.tokens.push(Spanned::new(
            token,
            Span::new(self.file_id, self.pos as u32, self.pos as u32 + 1),
        ));
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let span = Span::new(self.file_id, self.buffer_start as u32, self.pos as u32);
        let text = std::mem::take(&mut self.buffer);
        if let Some(token) = self.classify(&text, span) {
            self.tokens.push(Spanned::new(token, span));
        }
    }

    /// Classify a flushed buffer, in order: keyword, `A_B` pair, integer,
    /// boolean, name.
    fn classify(&mut self, text: &str, span: Span) -> Option<Lexeme> {
        if let Some(kw) = Keyword::from_word(text) {
            return Some(Lexeme::Keyword(kw));
        }
        if let Some((a, b)) = self.number_split(text, span) {
            return Some(Lexeme::NumberSplit(a, b));
        }
        if is_integer_literal(text) {
            return Some(match text.parse::<i64>() {
                Ok(n) => Lexeme::Integer(n),
                Err(_) => {
                    self.diagnostics.push(
                        Diagnostic::error(format!("integer literal '{}' is too large", text), span)
                            .with_help(format!(
                                "integers range from {} to {}",
                                i64::MIN,
                                i64::MAX
                            )),
                    );
                    Lexeme::Integer(0)
                }
            });
        }
        match text {
            "true" => Some(Lexeme::Boolean(true)),
            "false" => Some(Lexeme::Boolean(false)),
            _ if !text.trim().is_empty() => Some(Lexeme::Name(text.to_string())),
            _ => None,
        }
    }

    fn number_split(&mut self, text: &str, span: Span) -> Option<(i64, i64)> {
        let (a, b) = text.split_once('_')?;
        if !is_digits(a) || !is_digits(b) {
            return None;
        }
        match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(a), Ok(b)) => Some((a, b)),
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    format!("number pair literal '{}' is too large", text),
                    span,
                ));
                Some((0, 0))
            }
        }
    }
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    is_digits(digits)
}
