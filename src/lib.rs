pub mod ast;
pub mod diagnostic;
pub mod emit;
pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod typeck;
pub mod types;

use ast::Program;
use lexer::Lexer;
use parser::Parser;

pub use diagnostic::{render_diagnostics, Diagnostic, SourceFile};

/// Lex and parse every source file, in order, into one program model.
/// Item order across files is preserved and jump-target ids stay unique
/// for the whole compilation.
pub fn parse_sources(sources: &[SourceFile]) -> Result<Program, Vec<Diagnostic>> {
    let mut program = Program::default();
    for (file_id, source) in sources.iter().enumerate() {
        let (tokens, lex_errors) = Lexer::new(&source.text, file_id as u16).tokenize();
        if !lex_errors.is_empty() {
            return Err(lex_errors);
        }
        Parser::new(tokens).parse_into(&mut program)?;
    }
    Ok(program)
}

/// Full pipeline: scan, parse, type check, generate FASM text.
pub fn compile_sources(sources: &[SourceFile]) -> Result<String, Vec<Diagnostic>> {
    let program = parse_sources(sources)?;
    typeck::check_program(&program)?;
    emit::emit_program(&program)
}

/// Scan, parse, and type check without generating code.
pub fn check_sources(sources: &[SourceFile]) -> Result<(), Vec<Diagnostic>> {
    let program = parse_sources(sources)?;
    typeck::check_program(&program)
}

/// Convenience for a single anonymous source.
pub fn compile_source(source: &str) -> Result<String, Vec<Diagnostic>> {
    compile_sources(&[SourceFile::new("<source>", source)])
}
