use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexeme::{Keyword, Lexeme};
use crate::span::{Span, Spanned};

/// Infix spellings that lower to built-in `Invoke`s. `a OP b` is sugar for
/// `OP(a, b)`, so the right operand's instructions are emitted first and the
/// left operand ends on top of the stack.
const BINARY_OPERATORS: &[&str] = &[">", "=", "=1", "+", "-", "*1"];

/// Recursive-descent parser over one file's token list, appending items into
/// a shared [`Program`]. The program owns the jump-target counter, so ids
/// stay unique across every file of the compilation.
pub struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_into(mut self, program: &mut Program) -> Result<(), Vec<Diagnostic>> {
        match self.parse_items(program) {
            Ok(()) => Ok(()),
            Err(diag) => Err(vec![diag]),
        }
    }

    fn parse_items(&mut self, program: &mut Program) -> Result<(), Diagnostic> {
        loop {
            match self.peek().clone() {
                Lexeme::Eof => return Ok(()),
                Lexeme::Keyword(Keyword::Function) => {
                    self.advance();
                    let function = self.parse_function(program)?;
                    program.items.push(Item::Function(function));
                }
                Lexeme::Keyword(Keyword::Structure) => {
                    self.advance();
                    let structure = self.parse_structure()?;
                    program.items.push(Item::Structure(structure));
                }
                Lexeme::Keyword(Keyword::Constant) => {
                    self.advance();
                    let constant = self.parse_constant()?;
                    program.items.push(Item::Constant(constant));
                }
                other => {
                    return Err(Diagnostic::error(
                        format!(
                            "expected 'function', 'structure', or 'constant', found {}",
                            other.description()
                        ),
                        self.current_span(),
                    )
                    .with_help(
                        "statements are only allowed inside a function body".to_string(),
                    ));
                }
            }
        }
    }

    /// `Name(p1 t1, p2 t2, ...) : (r1 r2 ...) { stmt* }`. The `function`
    /// keyword is already consumed.
    fn parse_function(&mut self, program: &mut Program) -> Result<FunctionDef, Diagnostic> {
        let name = self.expect_name("function name")?;

        let mut parameters = Vec::new();
        self.expect(&Lexeme::OpenParen)?;
        while !self.at(&Lexeme::CloseParen) {
            let param = self.expect_name("parameter name")?;
            let ty = self.expect_name("parameter type")?;
            parameters.push((param.node, ty.node));
            self.eat(&Lexeme::Comma);
        }
        self.expect(&Lexeme::CloseParen)?;

        self.expect(&Lexeme::Colon)?;
        let mut returns = Vec::new();
        self.expect(&Lexeme::OpenParen)?;
        while !self.at(&Lexeme::CloseParen) {
            let ty = self.expect_name("return type")?;
            returns.push(ty.node);
            self.eat(&Lexeme::Comma);
        }
        self.expect(&Lexeme::CloseParen)?;

        self.expect(&Lexeme::OpenBrace)?;
        let mut function = FunctionDef {
            name,
            parameters,
            returns,
            instructions: Vec::new(),
            locals: Vec::new(),
        };
        self.parse_statements(&mut function, program)?;

        // Locals post-pass: frame slots in first-declaration order.
        for inst in &function.instructions {
            if let Instruction::Declare(name, ty) = &inst.node {
                if !function.locals.iter().any(|(local, _)| local == name) {
                    function.locals.push((name.clone(), ty.clone()));
                }
            }
        }
        Ok(function)
    }

    /// Statements up to and including the matching `}`.
    fn parse_statements(
        &mut self,
        function: &mut FunctionDef,
        program: &mut Program,
    ) -> Result<(), Diagnostic> {
        loop {
            let span = self.current_span();
            match self.peek().clone() {
                Lexeme::CloseBrace => {
                    self.advance();
                    return Ok(());
                }
                Lexeme::Eof => {
                    return Err(Diagnostic::error(
                        format!("unclosed body of function '{}'", function.name.node),
                        span,
                    ));
                }
                Lexeme::Keyword(Keyword::Variable) => {
                    self.advance();
                    let name = self.expect_name("variable name")?;
                    self.expect(&Lexeme::Colon)?;
                    let ty = self.expect_name("variable type")?;
                    function.instructions.push(Spanned::new(
                        Instruction::Declare(name.node.clone(), ty.node),
                        name.span,
                    ));
                    if self.at_name("=") {
                        self.advance();
                        let init = self.parse_expression()?;
                        function.instructions.extend(init);
                        function
                            .instructions
                            .push(Spanned::new(Instruction::Assign(name.node), name.span));
                    }
                    self.expect(&Lexeme::Semicolon)?;
                }
                Lexeme::Keyword(Keyword::Return) => {
                    self.advance();
                    if !self.at(&Lexeme::Semicolon) {
                        loop {
                            let value = self.parse_expression()?;
                            function.instructions.extend(value);
                            if !self.eat(&Lexeme::Comma) {
                                break;
                            }
                        }
                    }
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Return, span));
                    self.expect(&Lexeme::Semicolon)?;
                }
                Lexeme::Keyword(Keyword::If) => {
                    self.advance();
                    let end = program.alloc_target();
                    let condition = self.parse_expression()?;
                    function.instructions.extend(condition);
                    function
                        .instructions
                        .push(Spanned::new(Instruction::ConditionalJump(false, end), span));
                    self.expect(&Lexeme::OpenBrace)?;
                    self.parse_statements(function, program)?;
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Target(end), span));
                }
                Lexeme::Keyword(Keyword::While) => {
                    self.advance();
                    let top = program.alloc_target();
                    let end = program.alloc_target();
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Target(top), span));
                    let condition = self.parse_expression()?;
                    function.instructions.extend(condition);
                    function
                        .instructions
                        .push(Spanned::new(Instruction::ConditionalJump(false, end), span));
                    self.expect(&Lexeme::OpenBrace)?;
                    self.parse_statements(function, program)?;
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Jump(top), span));
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Target(end), span));
                }
                Lexeme::Name(name) if self.peek2_is_name("=") => {
                    self.advance();
                    self.advance();
                    let value = self.parse_expression()?;
                    function.instructions.extend(value);
                    function
                        .instructions
                        .push(Spanned::new(Instruction::Assign(name), span));
                    self.expect(&Lexeme::Semicolon)?;
                }
                Lexeme::Name(_)
                | Lexeme::Integer(_)
                | Lexeme::Boolean(_)
                | Lexeme::String(_)
                | Lexeme::NumberSplit(_, _) => {
                    let value = self.parse_expression()?;
                    function.instructions.extend(value);
                    self.expect(&Lexeme::Semicolon)?;
                }
                other => {
                    return Err(Diagnostic::error(
                        format!("expected a statement, found {}", other.description()),
                        span,
                    ));
                }
            }
        }
    }

    /// `Name { field type; ... }`. The `structure` keyword is consumed.
    fn parse_structure(&mut self) -> Result<StructureDef, Diagnostic> {
        let name = self.expect_name("structure name")?;
        self.expect(&Lexeme::OpenBrace)?;
        let mut fields = Vec::new();
        while !self.at(&Lexeme::CloseBrace) {
            let field = self.expect_name("field name")?;
            let ty = self.expect_name("field type")?;
            self.expect(&Lexeme::Semicolon)?;
            fields.push(StructureField { name: field, ty });
        }
        self.expect(&Lexeme::CloseBrace)?;
        Ok(StructureDef { name, fields })
    }

    /// `Name : type = literal;`. The `constant` keyword is consumed.
    fn parse_constant(&mut self) -> Result<ConstantDef, Diagnostic> {
        let name = self.expect_name("constant name")?;
        self.expect(&Lexeme::Colon)?;
        let ty = self.expect_name("constant type")?;
        if !self.at_name("=") {
            return Err(Diagnostic::error(
                format!("expected '=', found {}", self.peek().description()),
                self.current_span(),
            ));
        }
        self.advance();
        let token = self.advance();
        let value = match token.node {
            Lexeme::Integer(n) => ConstValue::Integer(n),
            Lexeme::Boolean(b) => ConstValue::Boolean(b),
            Lexeme::String(s) => ConstValue::String(s),
            Lexeme::NumberSplit(a, b) => ConstValue::Pair(a, b),
            other => {
                return Err(Diagnostic::error(
                    format!(
                        "expected a literal constant value, found {}",
                        other.description()
                    ),
                    token.span,
                ));
            }
        };
        self.expect(&Lexeme::Semicolon)?;
        Ok(ConstantDef {
            name,
            ty,
            value: Spanned::new(value, token.span),
        })
    }

    /// One expression, lowered to stack order. An operand optionally
    /// followed by an infix operator; `a OP b` emits b, then a, then
    /// `Invoke(OP)`, and chains right-associatively.
    fn parse_expression(&mut self) -> Result<Vec<Spanned<Instruction>>, Diagnostic> {
        let left = self.parse_operand()?;
        if let Lexeme::Name(op) = self.peek() {
            if BINARY_OPERATORS.contains(&op.as_str()) {
                let op = op.clone();
                let span = self.current_span();
                self.advance();
                let mut instructions = self.parse_expression()?;
                instructions.extend(left);
                instructions.push(Spanned::new(Instruction::Invoke(op), span));
                return Ok(instructions);
            }
        }
        Ok(left)
    }

    /// A literal push, a name retrieval, an invocation, or address-of.
    fn parse_operand(&mut self) -> Result<Vec<Spanned<Instruction>>, Diagnostic> {
        let token = self.advance();
        let span = token.span;
        match token.node {
            Lexeme::Integer(n) => Ok(vec![Spanned::new(Instruction::Integer(n), span)]),
            Lexeme::Boolean(b) => Ok(vec![Spanned::new(Instruction::Boolean(b), span)]),
            Lexeme::String(s) => Ok(vec![Spanned::new(Instruction::String(s), span)]),
            Lexeme::NumberSplit(a, b) => Ok(vec![Spanned::new(Instruction::Long(a, b), span)]),
            Lexeme::Name(name) => {
                if !self.at(&Lexeme::OpenParen) {
                    return Ok(vec![Spanned::new(Instruction::Retrieve(name), span)]);
                }
                self.advance();
                if name == "&" || name == "ptr" {
                    return self.parse_address_of(span);
                }
                // Arguments concatenate in reverse: the last argument's
                // instructions run first, the first argument ends on top.
                let mut instructions: Vec<Spanned<Instruction>> = Vec::new();
                while !self.at(&Lexeme::CloseParen) {
                    let mut argument = self.parse_expression()?;
                    argument.extend(instructions);
                    instructions = argument;
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::CloseParen)?;
                instructions.push(Spanned::new(Instruction::Invoke(name), span));
                Ok(instructions)
            }
            other => Err(Diagnostic::error(
                format!("expected an expression, found {}", other.description()),
                span,
            )),
        }
    }

    /// `&(x)` / `ptr(x)`: the single argument parses normally but a
    /// `Pointer` marker is appended instead of an `Invoke`.
    fn parse_address_of(&mut self, span: Span) -> Result<Vec<Spanned<Instruction>>, Diagnostic> {
        let mut instructions = self.parse_expression()?;
        self.expect(&Lexeme::CloseParen)?;
        match instructions.last().map(|inst| &inst.node) {
            Some(Instruction::Retrieve(_)) | Some(Instruction::Invoke(_)) => {
                instructions.push(Spanned::new(Instruction::Pointer, span));
                Ok(instructions)
            }
            _ => Err(Diagnostic::error(
                "cannot take the address of this expression".to_string(),
                span,
            )
            .with_help("only a variable, constant, or field access has an address".to_string())),
        }
    }

    // --- Cursor helpers ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].node
    }

    fn peek2_is_name(&self, text: &str) -> bool {
        match self.tokens.get(self.pos + 1) {
            Some(token) => matches!(&token.node, Lexeme::Name(name) if name == text),
            None => false,
        }
    }

    fn at(&self, lexeme: &Lexeme) -> bool {
        self.peek() == lexeme
    }

    fn at_name(&self, text: &str) -> bool {
        matches!(self.peek(), Lexeme::Name(name) if name == text)
    }

    fn eat(&mut self, lexeme: &Lexeme) -> bool {
        if self.at(lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Spanned<Lexeme> {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, lexeme: &Lexeme) -> Result<Span, Diagnostic> {
        if self.at(lexeme) {
            Ok(self.advance().span)
        } else {
            Err(Diagnostic::error(
                format!(
                    "expected {}, found {}",
                    lexeme.description(),
                    self.peek().description()
                ),
                self.current_span(),
            ))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<Spanned<String>, Diagnostic> {
        match self.peek().clone() {
            Lexeme::Name(name) => {
                let span = self.advance().span;
                Ok(Spanned::new(name, span))
            }
            other => Err(Diagnostic::error(
                format!("expected {}, found {}", what, other.description()),
                self.current_span(),
            )),
        }
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let (tokens, diags) = Lexer::new(source, 0).tokenize();
        assert!(diags.is_empty(), "lex errors: {:?}", diags);
        let mut program = Program::default();
        Parser::new(tokens)
            .parse_into(&mut program)
            .unwrap_or_else(|errs| {
                panic!("parse errors: {:?}", errs);
            });
        program
    }

    fn body(program: &Program, name: &str) -> Vec<Instruction> {
        program
            .function(name)
            .unwrap_or_else(|| panic!("no function '{}'", name))
            .instructions
            .iter()
            .map(|inst| inst.node.clone())
            .collect()
    }

    #[test]
    fn test_function_declarator() {
        let program = parse("function add(a integer, b integer) : (integer) { return a + b; }");
        let f = program.function("add").unwrap();
        assert_eq!(
            f.parameters,
            vec![
                ("a".to_string(), "integer".to_string()),
                ("b".to_string(), "integer".to_string()),
            ]
        );
        assert_eq!(f.returns, vec!["integer".to_string()]);
    }

    #[test]
    fn test_argument_order_is_reversed() {
        // g(a, b, c): the last argument is pushed first, the first last.
        let program = parse(
            "function main() : () { g(a, b, c); }\n\
             function g(a integer, b integer, c integer) : () { }",
        );
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Retrieve("c".to_string()),
                Instruction::Retrieve("b".to_string()),
                Instruction::Retrieve("a".to_string()),
                Instruction::Invoke("g".to_string()),
            ]
        );
    }

    #[test]
    fn test_nested_invocations_reverse_recursively() {
        let program = parse("function main() : () { f(g(1), 2); }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Integer(2),
                Instruction::Integer(1),
                Instruction::Invoke("g".to_string()),
                Instruction::Invoke("f".to_string()),
            ]
        );
    }

    #[test]
    fn test_infix_lowers_to_invoke() {
        // a - b is sugar for -(a, b): b first, a on top.
        let program = parse("function f(a integer, b integer) : (integer) { return a - b; }");
        assert_eq!(
            body(&program, "f"),
            vec![
                Instruction::Retrieve("b".to_string()),
                Instruction::Retrieve("a".to_string()),
                Instruction::Invoke("-".to_string()),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn test_variable_with_initializer() {
        let program = parse("function main() : () { variable x : integer = 3; }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Declare("x".to_string(), "integer".to_string()),
                Instruction::Integer(3),
                Instruction::Assign("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_bare_variable_declaration() {
        let program = parse("function main() : () { variable p : Point; }");
        assert_eq!(
            body(&program, "main"),
            vec![Instruction::Declare("p".to_string(), "Point".to_string())]
        );
    }

    #[test]
    fn test_assignment_statement() {
        let program = parse("function main() : () { variable i : integer = 0; i = i + 1; }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Declare("i".to_string(), "integer".to_string()),
                Instruction::Integer(0),
                Instruction::Assign("i".to_string()),
                Instruction::Integer(1),
                Instruction::Retrieve("i".to_string()),
                Instruction::Invoke("+".to_string()),
                Instruction::Assign("i".to_string()),
            ]
        );
    }

    #[test]
    fn test_if_lowering() {
        let program = parse("function main() : () { if true { f(); } }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Boolean(true),
                Instruction::ConditionalJump(false, 0),
                Instruction::Invoke("f".to_string()),
                Instruction::Target(0),
            ]
        );
    }

    #[test]
    fn test_while_lowering() {
        // Target(top), cond, ConditionalJump(false, end), body, Jump(top),
        // Target(end); top is allocated before end.
        let program = parse(
            "function main() : () { variable i : integer = 2; while i > 0 { i = i - 1; } }",
        );
        let instructions = body(&program, "main");
        assert_eq!(
            &instructions[3..],
            &[
                Instruction::Target(0),
                Instruction::Integer(0),
                Instruction::Retrieve("i".to_string()),
                Instruction::Invoke(">".to_string()),
                Instruction::ConditionalJump(false, 1),
                Instruction::Integer(1),
                Instruction::Retrieve("i".to_string()),
                Instruction::Invoke("-".to_string()),
                Instruction::Assign("i".to_string()),
                Instruction::Jump(0),
                Instruction::Target(1),
            ]
        );
    }

    #[test]
    fn test_target_ids_unique_across_functions() {
        let program = parse(
            "function a() : () { if true { } if true { } }\n\
             function b() : () { while false { } }",
        );
        let a = body(&program, "a");
        let b = body(&program, "b");
        assert!(a.contains(&Instruction::Target(0)));
        assert!(a.contains(&Instruction::Target(1)));
        assert!(b.contains(&Instruction::Target(2)));
        assert!(b.contains(&Instruction::Target(3)));
    }

    #[test]
    fn test_address_of() {
        let program = parse("function main() : () { f(&(p)); }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Retrieve("p".to_string()),
                Instruction::Pointer,
                Instruction::Invoke("f".to_string()),
            ]
        );
    }

    #[test]
    fn test_ptr_spelling() {
        let program = parse("function main() : () { f(ptr(p)); }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Retrieve("p".to_string()),
                Instruction::Pointer,
                Instruction::Invoke("f".to_string()),
            ]
        );
    }

    #[test]
    fn test_address_of_literal_is_rejected() {
        let (tokens, _) = Lexer::new("function main() : () { f(&(3)); }", 0).tokenize();
        let mut program = Program::default();
        let errs = Parser::new(tokens).parse_into(&mut program).unwrap_err();
        assert!(
            errs[0].message.contains("cannot take the address"),
            "got: {}",
            errs[0].message
        );
    }

    #[test]
    fn test_return_list_emits_in_declared_order() {
        let program = parse("function f() : (integer integer) { return 1, 2; }");
        assert_eq!(
            body(&program, "f"),
            vec![
                Instruction::Integer(1),
                Instruction::Integer(2),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn test_locals_post_pass_order() {
        let program = parse(
            "function main() : () {\n\
                 variable a : integer = 1;\n\
                 variable b : boolean = true;\n\
                 if b { variable c : integer = 2; }\n\
             }",
        );
        let f = program.function("main").unwrap();
        assert_eq!(
            f.locals,
            vec![
                ("a".to_string(), "integer".to_string()),
                ("b".to_string(), "boolean".to_string()),
                ("c".to_string(), "integer".to_string()),
            ]
        );
    }

    #[test]
    fn test_structure_fields_keep_order() {
        let program = parse("structure Point { x integer; y integer; }");
        let s = program.structure("Point").unwrap();
        let fields: Vec<(String, String)> = s
            .fields
            .iter()
            .map(|f| (f.name.node.clone(), f.ty.node.clone()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("x".to_string(), "integer".to_string()),
                ("y".to_string(), "integer".to_string()),
            ]
        );
    }

    #[test]
    fn test_constants() {
        let program = parse(
            "constant LIMIT : integer = 100;\n\
             constant GREETING : * = \"hello\";\n\
             constant WIDE : long = 3_4;",
        );
        assert_eq!(
            program.constant("LIMIT").unwrap().value.node,
            ConstValue::Integer(100)
        );
        assert_eq!(
            program.constant("GREETING").unwrap().value.node,
            ConstValue::String("hello".to_string())
        );
        assert_eq!(
            program.constant("WIDE").unwrap().value.node,
            ConstValue::Pair(3, 4)
        );
    }

    #[test]
    fn test_string_literal_expression() {
        let program = parse("function main() : () { @print(\"hi\", 2); }");
        assert_eq!(
            body(&program, "main"),
            vec![
                Instruction::Integer(2),
                Instruction::String("hi".to_string()),
                Instruction::Invoke("@print".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_statement_outside_function() {
        let (tokens, _) = Lexer::new("x = 3;", 0).tokenize();
        let mut program = Program::default();
        let errs = Parser::new(tokens).parse_into(&mut program).unwrap_err();
        assert!(
            errs[0].message.contains("expected 'function'"),
            "got: {}",
            errs[0].message
        );
    }

    #[test]
    fn test_error_unclosed_function() {
        let (tokens, _) = Lexer::new("function main() : () { f();", 0).tokenize();
        let mut program = Program::default();
        let errs = Parser::new(tokens).parse_into(&mut program).unwrap_err();
        assert!(
            errs[0].message.contains("unclosed body"),
            "got: {}",
            errs[0].message
        );
    }
}
