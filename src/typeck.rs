use std::collections::HashMap;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::types::{compatible, size_of};

/// A callable signature: user function, built-in, or synthesized accessor.
#[derive(Clone, Debug)]
pub struct FnSig {
    /// (name, type) in declaration order; the first parameter is popped
    /// first at an `Invoke`.
    pub params: Vec<(String, String)>,
    pub returns: Vec<String>,
}

/// The single table the type checker and the code generator reason over:
/// user functions, built-in operations, runtime helpers, and the three
/// synthesized accessors per structure field.
pub struct FunctionTable {
    map: HashMap<String, FnSig>,
}

impl FunctionTable {
    pub fn build(program: &Program) -> FunctionTable {
        let mut map = HashMap::new();

        for (name, sig) in builtin_signatures() {
            map.insert(name.to_string(), sig);
        }

        for structure in program.structures() {
            for field in &structure.fields {
                let (getter, ref_getter, setter) =
                    accessor_signatures(&structure.name.node, &field.ty.node);
                map.insert(
                    format!("{}->{}", structure.name.node, field.name.node),
                    getter,
                );
                map.insert(
                    format!("*{}->{}", structure.name.node, field.name.node),
                    ref_getter,
                );
                map.insert(
                    format!("{}<-{}", structure.name.node, field.name.node),
                    setter,
                );
            }
        }

        // User functions last: an explicit definition overrides a built-in
        // declaration of the same name.
        for function in program.functions() {
            map.insert(
                function.name.node.clone(),
                FnSig {
                    params: function.parameters.clone(),
                    returns: function.returns.clone(),
                },
            );
        }

        FunctionTable { map }
    }

    pub fn get(&self, name: &str) -> Option<&FnSig> {
        self.map.get(name)
    }
}

/// Built-in pseudo-operations and runtime helpers. The pseudo-operations are
/// inlined by the code generator; the helpers are real routines emitted in
/// the prelude.
fn builtin_signatures() -> Vec<(&'static str, FnSig)> {
    fn sig(params: &[(&str, &str)], returns: &[&str]) -> FnSig {
        FnSig {
            params: params
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            returns: returns.iter().map(|t| t.to_string()).collect(),
        }
    }

    vec![
        ("+", sig(&[("a", "integer"), ("b", "integer")], &["integer"])),
        ("-", sig(&[("a", "integer"), ("b", "integer")], &["integer"])),
        ("*1", sig(&[("a", "integer"), ("b", "integer")], &["integer"])),
        (">", sig(&[("a", "integer"), ("b", "integer")], &["boolean"])),
        ("=", sig(&[("a", "any"), ("b", "any")], &["boolean"])),
        ("=1", sig(&[("a", "any"), ("b", "any")], &["boolean"])),
        ("!", sig(&[("value", "boolean")], &["boolean"])),
        ("byte", sig(&[("pointer", "any")], &["integer"])),
        (
            "@syscall3",
            sig(
                &[
                    ("number", "integer"),
                    ("first", "any"),
                    ("second", "any"),
                    ("third", "any"),
                ],
                &["integer"],
            ),
        ),
        ("print_integer", sig(&[("value", "integer")], &[])),
        ("@print_integer", sig(&[("value", "integer")], &[])),
        ("@print", sig(&[("text", "*"), ("length", "integer")], &[])),
        ("@length", sig(&[("text", "*")], &["integer"])),
    ]
}

/// The three synthesized signatures for one structure field: read by value,
/// take the field's address, and write.
fn accessor_signatures(structure: &str, field_ty: &str) -> (FnSig, FnSig, FnSig) {
    let self_ty = format!("*{}", structure);
    let getter = FnSig {
        params: vec![("self".to_string(), self_ty.clone())],
        returns: vec![field_ty.to_string()],
    };
    let ref_getter = FnSig {
        params: vec![("self".to_string(), self_ty.clone())],
        returns: vec![format!("*{}", field_ty)],
    };
    let setter = FnSig {
        params: vec![
            ("self".to_string(), self_ty),
            ("value".to_string(), field_ty.to_string()),
        ],
        returns: Vec::new(),
    };
    (getter, ref_getter, setter)
}

/// Validate every function's instruction stream against a simulated type
/// stack. The first violation in a function stops that function; all failed
/// functions are reported together.
pub fn check_program(program: &Program) -> Result<(), Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    let structures = program.structure_map();

    for structure in program.structures() {
        if let Err(err) = size_of(&structure.name.node, &structures) {
            diagnostics.push(Diagnostic::error(
                format!("in structure '{}': {}", structure.name.node, err.message()),
                structure.name.span,
            ));
        }
    }

    let mut constants: HashMap<String, String> = HashMap::new();
    for constant in program.constants() {
        let literal_ty = match &constant.value.node {
            ConstValue::Integer(_) => "integer",
            ConstValue::Boolean(_) => "boolean",
            ConstValue::String(_) => "*",
            ConstValue::Pair(_, _) => "long",
        };
        if !compatible(literal_ty, &constant.ty.node, &structures) {
            diagnostics.push(Diagnostic::error(
                format!(
                    "constant '{}' is declared '{}' but its value is '{}'",
                    constant.name.node, constant.ty.node, literal_ty
                ),
                constant.value.span,
            ));
        }
        constants.insert(constant.name.node.clone(), constant.ty.node.clone());
    }

    let table = FunctionTable::build(program);

    match program.function("main") {
        None => diagnostics.push(
            Diagnostic::error(
                "no 'main' function; the program entry point calls it".to_string(),
                Span::dummy(),
            )
            .with_help("declare `function main() : () { ... }`".to_string()),
        ),
        Some(main) => {
            if !main.parameters.is_empty() || !main.returns.is_empty() {
                diagnostics.push(Diagnostic::error(
                    "'main' must take no parameters and return nothing".to_string(),
                    main.name.span,
                ));
            }
        }
    }

    for function in program.functions() {
        let checker = FunctionChecker {
            function,
            table: &table,
            structures: &structures,
            constants: &constants,
        };
        if let Err(diag) = checker.check() {
            diagnostics.push(diag);
        }
    }

    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

struct FunctionChecker<'a> {
    function: &'a FunctionDef,
    table: &'a FunctionTable,
    structures: &'a HashMap<String, StructureDef>,
    constants: &'a HashMap<String, String>,
}

impl<'a> FunctionChecker<'a> {
    fn check(&self) -> Result<(), Diagnostic> {
        // The environment starts with the parameters; the operand stack
        // starts empty (parameters are frame-resident until retrieved).
        let mut env: HashMap<String, String> = self
            .function
            .parameters
            .iter()
            .cloned()
            .collect();
        let mut stack: Vec<String> = Vec::new();

        for inst in &self.function.instructions {
            let span = inst.span;
            match &inst.node {
                Instruction::Integer(_) => stack.push("integer".to_string()),
                Instruction::Boolean(_) => stack.push("boolean".to_string()),
                Instruction::String(_) => stack.push("*".to_string()),
                Instruction::Long(_, _) => stack.push("long".to_string()),
                Instruction::Retrieve(name) => {
                    if let Some(ty) = env.get(name).or_else(|| self.constants.get(name)) {
                        stack.push(ty.clone());
                    } else {
                        return Err(self.error(format!("unknown name '{}'", name), span));
                    }
                }
                Instruction::Declare(name, ty) => {
                    if let Err(err) = size_of(ty, self.structures) {
                        return Err(self.error(
                            format!("variable '{}': {}", name, err.message()),
                            span,
                        ));
                    }
                    env.insert(name.clone(), ty.clone());
                }
                Instruction::Assign(name) => {
                    let wanted = match env.get(name) {
                        Some(ty) => ty.clone(),
                        None => {
                            return Err(self.error(format!("unknown name '{}'", name), span));
                        }
                    };
                    let given = self.pop(&mut stack, name, span)?;
                    if !compatible(&given, &wanted, self.structures) {
                        return Err(self.error(
                            format!(
                                "assignment to '{}' expects '{}', received '{}'",
                                name, wanted, given
                            ),
                            span,
                        ));
                    }
                }
                Instruction::Invoke(name) => {
                    if let Some(target) = name.strip_prefix("@cast_") {
                        self.pop(&mut stack, name, span)?;
                        stack.push(target.to_string());
                        continue;
                    }
                    let sig = self.table.get(name).ok_or_else(|| {
                        self.error(format!("unknown function '{}'", name), span)
                    })?;
                    for (param, wanted) in &sig.params {
                        let given = self.pop(&mut stack, name, span)?;
                        if !compatible(&given, wanted, self.structures) {
                            return Err(self.error(
                                format!(
                                    "argument '{}' of '{}' expects '{}', received '{}'",
                                    param, name, wanted, given
                                ),
                                span,
                            ));
                        }
                    }
                    for ty in &sig.returns {
                        stack.push(ty.clone());
                    }
                }
                Instruction::Pointer => {
                    let inner = self.pop(&mut stack, "address-of", span)?;
                    stack.push(format!("*{}", inner));
                }
                Instruction::Return => {
                    for (index, wanted) in self.function.returns.iter().enumerate().rev() {
                        let given = self.pop(&mut stack, "return", span)?;
                        if !compatible(&given, wanted, self.structures) {
                            return Err(self.error(
                                format!(
                                    "return value {} expects '{}', received '{}'",
                                    index + 1,
                                    wanted,
                                    given
                                ),
                                span,
                            ));
                        }
                    }
                    if !stack.is_empty() {
                        return Err(self.error(
                            format!(
                                "operand stack is not empty at 'return' ({} left: {})",
                                stack.len(),
                                stack.join(", ")
                            ),
                            span,
                        ));
                    }
                }
                Instruction::Target(_) | Instruction::Jump(_) => {}
                Instruction::ConditionalJump(_, _) => {
                    let given = self.pop(&mut stack, "condition", span)?;
                    if given != "boolean" {
                        return Err(self.error(
                            format!("condition expects 'boolean', received '{}'", given),
                            span,
                        ));
                    }
                }
            }
        }

        if !stack.is_empty() {
            return Err(self.error(
                format!(
                    "operand stack is not empty at end of function ({} left: {})",
                    stack.len(),
                    stack.join(", ")
                ),
                self.function.name.span,
            ));
        }
        Ok(())
    }

    fn pop(&self, stack: &mut Vec<String>, operand: &str, span: Span) -> Result<String, Diagnostic> {
        stack.pop().ok_or_else(|| {
            self.error(
                format!("operand stack is empty at '{}'", operand),
                span,
            )
        })
    }

    fn error(&self, message: String, span: Span) -> Diagnostic {
        Diagnostic::error(
            format!("in function '{}': {}", self.function.name.node, message),
            span,
        )
    }
}
