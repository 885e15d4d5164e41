use crate::span::Spanned;

/// A parsed compilation: every top-level item of every source file, in
/// source order. Item order is semantically significant: it fixes emission
/// order and, for structures, field layout.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub items: Vec<Item>,
    /// Monotonic allocator for jump-target ids, shared by every function of
    /// the compilation.
    next_target: u32,
}

impl Program {
    pub fn alloc_target(&mut self) -> u32 {
        let id = self.next_target;
        self.next_target += 1;
        id
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn structures(&self) -> impl Iterator<Item = &StructureDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Structure(s) => Some(s),
            _ => None,
        })
    }

    pub fn constants(&self) -> impl Iterator<Item = &ConstantDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Constant(c) => Some(c),
            _ => None,
        })
    }

    pub fn structure(&self, name: &str) -> Option<&StructureDef> {
        self.structures().find(|s| s.name.node == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions().find(|f| f.name.node == name)
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantDef> {
        self.constants().find(|c| c.name.node == name)
    }

    /// Structure definitions keyed by name, for type sizing.
    pub fn structure_map(&self) -> std::collections::HashMap<String, StructureDef> {
        self.structures()
            .map(|s| (s.name.node.clone(), s.clone()))
            .collect()
    }
}

/// Top-level items.
#[derive(Clone, Debug)]
pub enum Item {
    Constant(ConstantDef),
    Structure(StructureDef),
    Function(FunctionDef),
}

/// `constant Name : type = literal;`, a compile-time literal bound to a
/// global symbol.
#[derive(Clone, Debug)]
pub struct ConstantDef {
    pub name: Spanned<String>,
    pub ty: Spanned<String>,
    pub value: Spanned<ConstValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Integer(i64),
    Boolean(bool),
    String(String),
    /// The two halves of an `A_B` pair literal.
    Pair(i64, i64),
}

/// `structure Name { field type; ... }`. Field order is layout order.
#[derive(Clone, Debug)]
pub struct StructureDef {
    pub name: Spanned<String>,
    pub fields: Vec<StructureField>,
}

#[derive(Clone, Debug)]
pub struct StructureField {
    pub name: Spanned<String>,
    pub ty: Spanned<String>,
}

/// A user function: ordered parameters, return type list, and the lowered
/// instruction stream of its body.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: Spanned<String>,
    /// (name, type) in declaration order. The first parameter sits on top of
    /// the operand stack at call time.
    pub parameters: Vec<(String, String)>,
    pub returns: Vec<String>,
    pub instructions: Vec<Spanned<Instruction>>,
    /// (name, type) in first-declaration order; filled by the locals
    /// post-pass after the body is parsed. Order fixes frame slot order.
    pub locals: Vec<(String, String)>,
}

/// Per-function linear IR, executed against the operand stack.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Integer(i64),
    Boolean(bool),
    String(String),
    /// Both qwords of a pair literal: the first component is the low qword.
    Long(i64, i64),
    Retrieve(String),
    Assign(String),
    Declare(String, String),
    Invoke(String),
    /// Promotes the top of the type stack from `T` to `*T` and makes the
    /// preceding `Retrieve` or accessor `Invoke` produce an address.
    Pointer,
    Return,
    Target(u32),
    Jump(u32),
    ConditionalJump(bool, u32),
}
