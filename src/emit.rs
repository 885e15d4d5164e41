use std::collections::HashMap;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::types::{round_up8, size_of, stack_size};

/// FASM emitter. Walks the program model and produces an ELF64 executable
/// source. Every expression value lives on the machine stack; the only
/// registers in play are transient scratch within a single instruction's
/// translation.
pub struct Emitter<'p> {
    program: &'p Program,
    structures: HashMap<String, StructureDef>,
    output: Vec<String>,
    /// Readable-segment lines for string literals, in allocation order.
    data: Vec<String>,
    data_counter: u32,
}

pub fn emit_program(program: &Program) -> Result<String, Vec<Diagnostic>> {
    Emitter::new(program).emit().map_err(|diag| vec![diag])
}

/// Frame layout of one function. Parameter and local offsets are cumulative
/// rounded slot sizes; the stored size is the unrounded memory size used by
/// the chunked copies.
struct Frame {
    params: Vec<(String, u64, u64)>,
    params_size: u64,
    locals: Vec<(String, u64, u64)>,
    locals_size: u64,
    returns_size: u64,
}

impl Frame {
    fn param(&self, name: &str) -> Option<(u64, u64)> {
        self.params
            .iter()
            .find(|(param, _, _)| param == name)
            .map(|&(_, loc, size)| (loc, size))
    }

    fn local(&self, name: &str) -> Option<(u64, u64)> {
        self.locals
            .iter()
            .find(|(local, _, _)| local == name)
            .map(|&(_, loc, size)| (loc, size))
    }
}

impl<'p> Emitter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            structures: program.structure_map(),
            output: Vec::new(),
            data: Vec::new(),
            data_counter: 0,
        }
    }

    pub fn emit(mut self) -> Result<String, Diagnostic> {
        let program = self.program;
        self.emit_prelude();
        self.emit_print_integer();
        self.emit_print();
        self.emit_length();

        for item in &program.items {
            if let Item::Structure(structure) = item {
                self.emit_structure_accessors(structure)?;
            }
        }

        for item in &program.items {
            if let Item::Function(function) = item {
                // An empty body is a pure declaration; it emits nothing.
                if !function.instructions.is_empty() {
                    self.emit_function(function)?;
                }
            }
        }

        self.raw("");
        self.raw("segment readable");
        let constants = self.emit_constants();
        let data = std::mem::take(&mut self.data);
        self.output.extend(data);
        self.output.extend(constants);

        Ok(self.output.join("\n") + "\n")
    }

    fn emit_prelude(&mut self) {
        self.raw("format ELF64 executable");
        self.raw("entry start");
        self.raw("segment readable executable");
        self.raw("start:");
        self.inst("call main");
        self.inst("mov rax, 60");
        self.inst("mov rdi, 1");
        self.inst("syscall");
    }

    /// Formats the popped integer as signed decimal plus a newline and
    /// writes it with syscall 1. Digits grow downward from a buffer inside
    /// the frame.
    fn emit_print_integer(&mut self) {
        self.raw("");
        self.raw("@print_integer:");
        self.inst("push rbp");
        self.inst("mov rbp, rsp");
        self.inst("sub rsp, 48");
        self.inst("mov rax, [rbp+16]");
        self.inst("lea rdi, [rbp-16]");
        self.inst("mov byte [rdi], 10");
        self.inst("mov rcx, 1");
        self.inst("xor r9, r9");
        self.inst("test rax, rax");
        self.inst("jns @print_integer_digit");
        self.inst("neg rax");
        self.inst("mov r9, 1");
        self.raw("@print_integer_digit:");
        self.inst("mov rbx, 10");
        self.inst("xor rdx, rdx");
        self.inst("div rbx");
        self.inst("add rdx, 48");
        self.inst("dec rdi");
        self.inst("mov [rdi], dl");
        self.inst("inc rcx");
        self.inst("test rax, rax");
        self.inst("jnz @print_integer_digit");
        self.inst("test r9, r9");
        self.inst("jz @print_integer_write");
        self.inst("dec rdi");
        self.inst("mov byte [rdi], 45");
        self.inst("inc rcx");
        self.raw("@print_integer_write:");
        self.inst("mov rax, 1");
        self.inst("mov rsi, rdi");
        self.inst("mov rdi, 1");
        self.inst("mov rdx, rcx");
        self.inst("syscall");
        self.emit_return_protocol(8, 0);
    }

    /// write(1, pointer, length).
    fn emit_print(&mut self) {
        self.raw("");
        self.raw("@print:");
        self.inst("push rbp");
        self.inst("mov rbp, rsp");
        self.inst("sub rsp, 16");
        self.inst("mov rax, 1");
        self.inst("mov rdi, 1");
        self.inst("mov rsi, [rbp+16]");
        self.inst("mov rdx, [rbp+24]");
        self.inst("syscall");
        self.emit_return_protocol(16, 0);
    }

    /// Length of a NUL-terminated string.
    fn emit_length(&mut self) {
        self.raw("");
        self.raw("@length:");
        self.inst("push rbp");
        self.inst("mov rbp, rsp");
        self.inst("sub rsp, 16");
        self.inst("mov rdi, [rbp+16]");
        self.inst("xor rax, rax");
        self.inst("mov rcx, -1");
        self.inst("repne scasb");
        self.inst("not rcx");
        self.inst("dec rcx");
        self.inst("push rcx");
        self.emit_return_protocol(8, 8);
    }

    /// The three synthetic routines per field: read by value, take the
    /// field's address, write. Each obeys the full calling convention so
    /// callers cannot tell them from user functions.
    fn emit_structure_accessors(&mut self, structure: &StructureDef) -> Result<(), Diagnostic> {
        let mut offset = 0u64;
        for field in &structure.fields {
            let size = self.size(&field.ty.node, field.ty.span)?;
            let rounded = round_up8(size);

            // S->F: (*S) -> (T)
            self.raw("");
            self.raw(&format!(
                "{}:",
                escape_symbol(&format!("{}->{}", structure.name.node, field.name.node))
            ));
            self.inst("push rbp");
            self.inst("mov rbp, rsp");
            self.inst("sub rsp, 16");
            self.inst("mov rbx, [rbp+16]");
            self.inst(&format!("sub rsp, {}", rounded));
            self.copy_chunks(
                |chunk| mem_reg("rbx", (offset + chunk) as i64),
                |chunk| mem_reg("rsp", chunk as i64),
                size,
                field.ty.span,
            )?;
            self.emit_return_protocol(8, rounded);

            // *S->F: (*S) -> (*T)
            self.raw("");
            self.raw(&format!(
                "{}:",
                escape_symbol(&format!("*{}->{}", structure.name.node, field.name.node))
            ));
            self.inst("push rbp");
            self.inst("mov rbp, rsp");
            self.inst("sub rsp, 16");
            self.inst("mov rax, [rbp+16]");
            if offset > 0 {
                self.inst(&format!("lea rax, [rax+{}]", offset));
            }
            self.inst("push rax");
            self.emit_return_protocol(8, 8);

            // S<-F: (*S, T) -> ()
            self.raw("");
            self.raw(&format!(
                "{}:",
                escape_symbol(&format!("{}<-{}", structure.name.node, field.name.node))
            ));
            self.inst("push rbp");
            self.inst("mov rbp, rsp");
            self.inst("sub rsp, 16");
            self.inst("mov rbx, [rbp+16]");
            self.copy_chunks(
                |chunk| mem_reg("rbp", (24 + chunk) as i64),
                |chunk| mem_reg("rbx", (offset + chunk) as i64),
                size,
                field.ty.span,
            )?;
            self.emit_return_protocol(8 + rounded, 0);

            offset += size;
        }
        Ok(())
    }

    fn emit_function(&mut self, function: &FunctionDef) -> Result<(), Diagnostic> {
        let frame = self.build_frame(function)?;

        self.raw("");
        self.raw(&format!("{}:", escape_symbol(&function.name.node)));
        self.inst("push rbp");
        self.inst("mov rbp, rsp");
        self.inst(&format!("sub rsp, {}", frame.locals_size + 16));

        for (index, inst) in function.instructions.iter().enumerate() {
            let pointer_next = matches!(
                function.instructions.get(index + 1).map(|next| &next.node),
                Some(Instruction::Pointer)
            );
            self.emit_instruction(&frame, &inst.node, inst.span, pointer_next)?;
        }

        // Generic epilogue: the zero-return case of the return protocol.
        self.emit_return_protocol(frame.params_size, 0);
        Ok(())
    }

    fn emit_instruction(
        &mut self,
        frame: &Frame,
        inst: &Instruction,
        span: Span,
        pointer_next: bool,
    ) -> Result<(), Diagnostic> {
        match inst {
            Instruction::Integer(n) => self.push_immediate(*n),
            Instruction::Boolean(b) => self.inst(&format!("push {}", if *b { 1 } else { 0 })),
            Instruction::String(text) => {
                let label = self.intern_string(text);
                self.inst(&format!("push {}", label));
            }
            Instruction::Long(a, b) => {
                // The first component is the low qword, so it is pushed last.
                self.push_immediate(*b);
                self.push_immediate(*a);
            }
            Instruction::Retrieve(name) => {
                self.emit_retrieve(frame, name, span, pointer_next)?;
            }
            Instruction::Assign(name) => {
                let (base, size) = if let Some((loc, size)) = frame.param(name) {
                    ((16 + loc) as i64, size)
                } else if let Some((loc, size)) = frame.local(name) {
                    (-((8 + loc + size) as i64), size)
                } else {
                    return Err(Diagnostic::error(
                        format!("cannot assign to '{}': no frame slot", name),
                        span,
                    ));
                };
                self.copy_chunks(
                    |chunk| mem_reg("rsp", chunk as i64),
                    |chunk| mem_reg("rbp", base + chunk as i64),
                    size,
                    span,
                )?;
                self.inst(&format!("add rsp, {}", round_up8(size)));
            }
            Instruction::Declare(_, _) => {}
            Instruction::Invoke(name) => {
                self.emit_invoke(name, pointer_next);
            }
            Instruction::Pointer => {}
            Instruction::Return => {
                self.emit_return_protocol(frame.params_size, frame.returns_size);
            }
            Instruction::Target(id) => self.raw(&format!("target_{}:", id)),
            Instruction::Jump(id) => self.inst(&format!("jmp target_{}", id)),
            Instruction::ConditionalJump(wants, id) => {
                self.inst("pop rax");
                self.inst(&format!("cmp rax, {}", if *wants { 1 } else { 0 }));
                self.inst(&format!("je target_{}", id));
            }
        }
        Ok(())
    }

    fn emit_retrieve(
        &mut self,
        frame: &Frame,
        name: &str,
        span: Span,
        pointer_next: bool,
    ) -> Result<(), Diagnostic> {
        let program = self.program;
        if let Some((loc, size)) = frame.param(name) {
            let base = (16 + loc) as i64;
            if pointer_next {
                self.inst(&format!("lea rax, {}", mem_reg("rbp", base)));
                self.inst("push rax");
            } else {
                self.push_copy(|chunk| mem_reg("rbp", base + chunk as i64), size, span)?;
            }
        } else if let Some((loc, size)) = frame.local(name) {
            let base = -((8 + loc + size) as i64);
            if pointer_next {
                self.inst(&format!("lea rax, {}", mem_reg("rbp", base)));
                self.inst("push rax");
            } else {
                self.push_copy(|chunk| mem_reg("rbp", base + chunk as i64), size, span)?;
            }
        } else if let Some(constant) = program.constant(name) {
            let label = escape_symbol(name);
            if pointer_next {
                self.inst(&format!("push {}", label));
            } else {
                let size = self.size(&constant.ty.node, span)?;
                self.push_copy(|chunk| mem_label(&label, chunk), size, span)?;
            }
        } else {
            return Err(Diagnostic::error(
                format!("cannot retrieve '{}': no frame slot or constant", name),
                span,
            ));
        }
        Ok(())
    }

    /// Built-in pseudo-operations inline at the call site; everything else
    /// is a plain `call`; the callee consumes its arguments and leaves its
    /// returns in their place.
    fn emit_invoke(&mut self, name: &str, pointer_next: bool) {
        match name {
            "+" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("add rax, rbx");
                self.inst("push rax");
            }
            "-" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("sub rax, rbx");
                self.inst("push rax");
            }
            "*1" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("imul rax, rbx");
                self.inst("push rax");
            }
            ">" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("cmp rax, rbx");
                self.inst("setg al");
                self.inst("movzx rax, al");
                self.inst("push rax");
            }
            "=" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("cmp rax, rbx");
                self.inst("sete al");
                self.inst("movzx rax, al");
                self.inst("push rax");
            }
            "=1" => {
                self.inst("pop rax");
                self.inst("pop rbx");
                self.inst("cmp al, bl");
                self.inst("sete al");
                self.inst("movzx rax, al");
                self.inst("push rax");
            }
            "!" => {
                self.inst("pop rax");
                self.inst("xor rax, 1");
                self.inst("push rax");
            }
            "byte" => {
                self.inst("pop rax");
                self.inst("movzx rax, byte [rax]");
                self.inst("push rax");
            }
            "@syscall3" => {
                self.inst("pop rax");
                self.inst("pop rdi");
                self.inst("pop rsi");
                self.inst("pop rdx");
                self.inst("syscall");
                self.inst("push rax");
            }
            _ if name.starts_with("@cast_") => {}
            "print_integer" => self.inst("call @print_integer"),
            _ => {
                // An address-of on a field read calls the address-returning
                // accessor instead.
                let effective = if pointer_next && name.contains("->") {
                    format!("*{}", name)
                } else {
                    name.to_string()
                };
                self.inst(&format!("call {}", escape_symbol(&effective)));
            }
        }
    }

    /// The return protocol: save the caller's frame pointer and return
    /// address, copy the return values over the argument area (top chunk
    /// first, since the regions may overlap), restore the stack so the caller
    /// finds exactly the returns where its arguments were, and ret.
    fn emit_return_protocol(&mut self, params_size: u64, returns_size: u64) {
        self.inst("mov r10, [rbp]");
        self.inst("mov r11, [rbp+8]");
        let mut chunk = returns_size;
        while chunk > 0 {
            chunk -= 8;
            self.inst(&format!("mov rax, {}", mem_reg("rsp", chunk as i64)));
            let dest = 16 + params_size as i64 - returns_size as i64 + chunk as i64;
            self.inst(&format!("mov {}, rax", mem_reg("rbp", dest)));
        }
        self.inst("mov rsp, rbp");
        let delta = 16 + params_size as i64 - returns_size as i64;
        if delta > 0 {
            self.inst(&format!("add rsp, {}", delta));
        } else if delta < 0 {
            self.inst(&format!("sub rsp, {}", -delta));
        }
        self.inst("push r10");
        self.inst("pop rbp");
        self.inst("push r11");
        self.inst("ret");
    }

    fn emit_constants(&mut self) -> Vec<String> {
        let program = self.program;
        let mut lines = Vec::new();
        for constant in program.constants() {
            let label = escape_symbol(&constant.name.node);
            let line = match &constant.value.node {
                ConstValue::Integer(n) => format!("{}: dq {}", label, n),
                ConstValue::Boolean(b) => format!("{}: dq {}", label, if *b { 1 } else { 0 }),
                ConstValue::Pair(a, b) => format!("{}: dq {}, {}", label, a, b),
                ConstValue::String(text) => {
                    let data_label = self.intern_string(text);
                    format!("{}: dq {}", label, data_label)
                }
            };
            lines.push(line);
        }
        lines
    }

    // --- Helpers ---

    fn build_frame(&self, function: &FunctionDef) -> Result<Frame, Diagnostic> {
        let mut params = Vec::new();
        let mut params_size = 0u64;
        for (name, ty) in &function.parameters {
            let size = self.size(ty, function.name.span)?;
            params.push((name.clone(), params_size, size));
            params_size += round_up8(size);
        }
        let mut locals = Vec::new();
        let mut locals_size = 0u64;
        for (name, ty) in &function.locals {
            let size = self.size(ty, function.name.span)?;
            locals.push((name.clone(), locals_size, size));
            locals_size += round_up8(size);
        }
        let mut returns_size = 0u64;
        for ty in &function.returns {
            returns_size += stack_size(ty, &self.structures).map_err(|err| {
                Diagnostic::error(
                    format!("in function '{}': {}", function.name.node, err.message()),
                    function.name.span,
                )
            })?;
        }
        Ok(Frame {
            params,
            params_size,
            locals,
            locals_size,
            returns_size,
        })
    }

    fn size(&self, ty: &str, span: Span) -> Result<u64, Diagnostic> {
        size_of(ty, &self.structures).map_err(|err| Diagnostic::error(err.message(), span))
    }

    /// Reserve rounded stack space and copy `size` bytes onto it.
    fn push_copy(
        &mut self,
        src: impl Fn(u64) -> String,
        size: u64,
        span: Span,
    ) -> Result<(), Diagnostic> {
        self.inst(&format!("sub rsp, {}", round_up8(size)));
        self.copy_chunks(src, |chunk| mem_reg("rsp", chunk as i64), size, span)
    }

    /// Copy `size` bytes in 8-byte chunks with a 4- then 2-byte tail. An odd
    /// residue has no supported granularity.
    fn copy_chunks(
        &mut self,
        src: impl Fn(u64) -> String,
        dst: impl Fn(u64) -> String,
        size: u64,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let mut chunk = 0u64;
        while size - chunk >= 8 {
            self.inst(&format!("mov rax, {}", src(chunk)));
            self.inst(&format!("mov {}, rax", dst(chunk)));
            chunk += 8;
        }
        if size - chunk >= 4 {
            self.inst(&format!("mov eax, {}", src(chunk)));
            self.inst(&format!("mov {}, eax", dst(chunk)));
            chunk += 4;
        }
        if size - chunk >= 2 {
            self.inst(&format!("mov ax, {}", src(chunk)));
            self.inst(&format!("mov {}, ax", dst(chunk)));
            chunk += 2;
        }
        if size - chunk != 0 {
            return Err(Diagnostic::error(
                format!(
                    "cannot copy a value of size {} (chunk granularities are 8, 4, 2)",
                    size
                ),
                span,
            ));
        }
        Ok(())
    }

    /// `push` only takes a sign-extended 32-bit immediate; wider values go
    /// through rax.
    fn push_immediate(&mut self, value: i64) {
        if i32::try_from(value).is_ok() {
            self.inst(&format!("push {}", value));
        } else {
            self.inst(&format!("mov rax, {}", value));
            self.inst("push rax");
        }
    }

    /// Allocate a data label for a string literal and return it.
    fn intern_string(&mut self, text: &str) -> String {
        let label = format!("_{}", self.data_counter);
        self.data_counter += 1;
        self.data.push(format!("{}: db {}", label, db_bytes(text)));
        label
    }

    fn inst(&mut self, instruction: &str) {
        self.output.push(format!("    {}", instruction));
    }

    fn raw(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

/// `[reg+disp]` with signed displacement.
fn mem_reg(reg: &str, disp: i64) -> String {
    match disp.cmp(&0) {
        std::cmp::Ordering::Greater => format!("[{}+{}]", reg, disp),
        std::cmp::Ordering::Equal => format!("[{}]", reg),
        std::cmp::Ordering::Less => format!("[{}-{}]", reg, -disp),
    }
}

fn mem_label(label: &str, disp: u64) -> String {
    if disp == 0 {
        format!("[{}]", label)
    } else {
        format!("[{}+{}]", label, disp)
    }
}

/// Assembly labels cannot contain the accessor punctuation; each such
/// character becomes its decimal ASCII code, and a leading digit gets an
/// underscore prefix. The result is unique and deterministic.
pub fn escape_symbol(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '-' => out.push_str("45"),
            '>' => out.push_str("62"),
            '<' => out.push_str("60"),
            '*' => out.push_str("42"),
            _ => out.push(ch),
        }
    }
    if out.starts_with(|ch: char| ch.is_ascii_digit()) {
        format!("_{}", out)
    } else {
        out
    }
}

/// Render a string literal as FASM `db` operands: printable runs quoted,
/// everything else (quotes, non-ASCII, control bytes) numeric, then the NUL
/// terminator.
fn db_bytes(text: &str) -> String {
    let mut parts = Vec::new();
    let mut run = String::new();
    for byte in text.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'"' {
            run.push(byte as char);
        } else {
            if !run.is_empty() {
                parts.push(format!("\"{}\"", run));
                run.clear();
            }
            parts.push(byte.to_string());
        }
    }
    if !run.is_empty() {
        parts.push(format!("\"{}\"", run));
    }
    parts.push("0".to_string());
    parts.join(", ")
}
