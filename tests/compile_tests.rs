use barely::{check_sources, compile_source, compile_sources, parse_sources, SourceFile};

/// Helper: compile a single source and panic with the diagnostics on error.
fn compile(source: &str) -> String {
    compile_source(source).unwrap_or_else(|errs| {
        panic!(
            "program should compile, got {} errors: {:?}",
            errs.len(),
            errs.iter().map(|e| &e.message).collect::<Vec<_>>()
        )
    })
}

#[test]
fn test_minimal_program() {
    let asm = compile("function main() : () { }");
    assert!(asm.starts_with("format ELF64 executable"));
    assert!(asm.contains("entry start"));
    assert!(asm.contains("main:"));
    assert!(asm.contains("segment readable executable"));
    assert!(asm.contains("segment readable"));
}

#[test]
fn test_add_and_print() {
    let asm = compile(
        "function main() : () {\n\
             print_integer(add(3, 4));\n\
         }\n\
         function add(a integer, b integer) : (integer) { return a + b; }",
    );
    assert!(asm.contains("call add"));
    assert!(asm.contains("call @print_integer"));
}

#[test]
fn test_hello_with_runtime_helpers() {
    let asm = compile(
        "function main() : () {\n\
             variable s : * = \"hello\";\n\
             @print(s, @length(s));\n\
         }",
    );
    assert!(asm.contains("db \"hello\", 0"));
    assert!(asm.contains("call @length"));
    assert!(asm.contains("call @print"));
}

#[test]
fn test_structures_end_to_end() {
    let asm = compile(
        "structure Point { x integer; y integer; }\n\
         function main() : () {\n\
             variable p : Point;\n\
             Point<-x(&(p), 3);\n\
             Point<-y(&(p), 4);\n\
             print_integer(Point->x(&(p)));\n\
         }",
    );
    // Setter, getter, and address accessor are all emitted and escaped.
    assert!(asm.contains("Point6045x:"));
    assert!(asm.contains("Point4562x:"));
    assert!(asm.contains("_42Point4562x:"));
    assert!(asm.contains("call Point6045x"));
    assert!(asm.contains("call Point4562x"));
}

#[test]
fn test_multiple_files_concatenate_in_order() {
    let sources = [
        SourceFile::new(
            "main.barely",
            "function main() : () { print_integer(seven()); }",
        ),
        SourceFile::new("lib.barely", "function seven() : (integer) { return 7; }"),
    ];
    let asm = compile_sources(&sources).expect("two-file program should compile");
    let main_at = asm.find("\nmain:").expect("main label");
    let seven_at = asm.find("\nseven:").expect("seven label");
    assert!(main_at < seven_at, "emission follows file order");
}

#[test]
fn test_multi_file_diagnostic_names_second_file() {
    let sources = [
        SourceFile::new("main.barely", "function main() : () { }"),
        SourceFile::new("lib.barely", "function bad() : () { if 3 { } }"),
    ];
    let errs = check_sources(&sources).unwrap_err();
    assert_eq!(errs[0].span.file_id, 1);
    assert!(errs[0].message.contains("in function 'bad'"));
}

#[test]
fn test_check_passes_without_emitting() {
    check_sources(&[SourceFile::new(
        "ok.barely",
        "function main() : () { variable i : integer = 0; while i > 0 { i = i - 1; } }",
    )])
    .expect("valid program");
}

#[test]
fn test_type_errors_stop_compilation() {
    let errs = compile_source("function main() : () { print_integer(true); }").unwrap_err();
    assert!(
        errs[0].message.contains("expects 'integer', received 'boolean'"),
        "got: {}",
        errs[0].message
    );
}

#[test]
fn test_parse_error_reports_and_stops() {
    let errs = compile_source("function main( : () { }").unwrap_err();
    assert_eq!(errs.len(), 1);
}

#[test]
fn test_jump_targets_unique_across_files() {
    let sources = [
        SourceFile::new("a.barely", "function main() : () { if true { } }"),
        SourceFile::new("b.barely", "function other() : () { if false { } }"),
    ];
    let program = parse_sources(&sources).expect("parse");
    let asm = {
        barely::typeck::check_program(&program).expect("check");
        barely::emit::emit_program(&program).expect("emit")
    };
    assert!(asm.contains("target_0:"));
    assert!(asm.contains("target_1:"));
}

#[test]
fn test_compile_writes_asm_on_disk() {
    // The driver-facing flow: read a source from disk, compile, write the
    // .asm next to it.
    let dir = tempfile::tempdir().expect("tempdir");
    let source_path = dir.path().join("demo.barely");
    std::fs::write(
        &source_path,
        "function main() : () { print_integer(21 + 21); }",
    )
    .expect("write source");

    let text = std::fs::read_to_string(&source_path).expect("read source");
    let asm = compile(&text);

    let build_dir = dir.path().join("build");
    std::fs::create_dir_all(&build_dir).expect("create build dir");
    let asm_path = build_dir.join("demo.asm");
    std::fs::write(&asm_path, &asm).expect("write asm");

    let written = std::fs::read_to_string(&asm_path).expect("read asm back");
    assert!(written.starts_with("format ELF64 executable"));
    assert!(written.contains("call @print_integer"));
}

#[test]
fn test_constants_shared_across_files() {
    let sources = [
        SourceFile::new("consts.barely", "constant LIMIT : integer = 9;"),
        SourceFile::new(
            "main.barely",
            "function main() : () { print_integer(LIMIT); }",
        ),
    ];
    let asm = compile_sources(&sources).expect("constant visible across files");
    assert!(asm.contains("LIMIT: dq 9"));
    assert!(asm.contains("mov rax, [LIMIT]"));
}
