use std::path::{Path, PathBuf};
use std::process::{self, Command};

use clap::Parser;

use barely::SourceFile;

#[derive(Parser)]
#[command(
    name = "barely",
    version,
    about = "Barely compiler: stack-ordered x86-64 via flat assembler"
)]
struct Cli {
    /// Input .barely source files, concatenated in order
    #[arg(required = true)]
    sources: Vec<PathBuf>,
    /// Directory for the emitted .asm and the linked binary
    #[arg(long, default_value = "build")]
    build_dir: PathBuf,
    /// Stop after type checking
    #[arg(long)]
    check: bool,
    /// Write the .asm without invoking fasm
    #[arg(long)]
    no_assemble: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut sources = Vec::new();
    for path in &cli.sources {
        match std::fs::read_to_string(path) {
            Ok(text) => sources.push(SourceFile::new(path.display().to_string(), text)),
            Err(err) => {
                eprintln!("error: cannot read '{}': {}", path.display(), err);
                process::exit(1);
            }
        }
    }

    if cli.check {
        if let Err(diagnostics) = barely::check_sources(&sources) {
            barely::render_diagnostics(&diagnostics, &sources);
            process::exit(1);
        }
        eprintln!("Checked {} file(s), no errors", sources.len());
        return;
    }

    let asm = match barely::compile_sources(&sources) {
        Ok(asm) => asm,
        Err(diagnostics) => {
            barely::render_diagnostics(&diagnostics, &sources);
            process::exit(1);
        }
    };

    // The first source names the outputs, with its .barely suffix stripped.
    let name = output_name(&cli.sources[0]);

    if let Err(err) = std::fs::create_dir_all(&cli.build_dir) {
        eprintln!(
            "error: cannot create '{}': {}",
            cli.build_dir.display(),
            err
        );
        process::exit(1);
    }

    let asm_path = cli.build_dir.join(format!("{}.asm", name));
    if let Err(err) = std::fs::write(&asm_path, &asm) {
        eprintln!("error: cannot write '{}': {}", asm_path.display(), err);
        process::exit(1);
    }
    eprintln!("Compiled -> {}", asm_path.display());

    if cli.no_assemble {
        return;
    }

    let binary_path = cli.build_dir.join(name);
    match Command::new("fasm").arg(&asm_path).arg(&binary_path).status() {
        Ok(status) if status.success() => {
            eprintln!("Assembled -> {}", binary_path.display());
        }
        Ok(status) => {
            process::exit(status.code().unwrap_or(1));
        }
        Err(err) => {
            eprintln!("error: cannot run fasm: {}", err);
            process::exit(1);
        }
    }
}

/// Basename of the first source with a `.barely` suffix stripped.
fn output_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    file_name
        .strip_suffix(".barely")
        .map(str::to_string)
        .unwrap_or(file_name)
}
