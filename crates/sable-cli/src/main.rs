//! `sable` — compile and run TypeScript on the Sable VM.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sable_runtime::{Vm, VmError};

#[derive(Parser)]
#[command(name = "sable", version, about = "TypeScript compiler and bytecode VM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and run a TypeScript file
    Run {
        /// Entry source file
        file: PathBuf,
    },
    /// Compile a file and write the bytecode module next to it
    Build {
        /// Entry source file
        file: PathBuf,
        /// Output path (defaults to the input with a .sbc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile a file and print its disassembly
    Disasm {
        /// Entry source file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    match cli.command {
        Command::Run { file } => {
            let path = file.to_string_lossy().into_owned();
            let source = std::fs::read_to_string(&file)
                .map_err(|e| format!("cannot read {path}: {e}"))?;
            let module =
                sable_emitter::compile(&source, &path).map_err(|e| e.to_string())?;

            let mut vm = Vm::new();
            vm.set_loader(Box::new(|module_path: &str| {
                let source = std::fs::read_to_string(module_path).map_err(|e| VmError::Host {
                    code: "ENOENT".into(),
                    message: format!("cannot read {module_path}: {e}"),
                })?;
                sable_emitter::compile(&source, module_path)
                    .map_err(|e| VmError::Internal(e.to_string()))
            }));

            match vm.run_module(module, &path) {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(VmError::Exit(code)) => Ok(ExitCode::from(code.clamp(0, 255) as u8)),
                Err(error) => {
                    let thrown = vm.error_to_value(error);
                    let text = sable_runtime::ops::stringify(&mut vm, &thrown)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| "<error>".to_string());
                    Err(format!("Uncaught {text}"))
                }
            }
        }
        Command::Build { file, output } => {
            let path = file.to_string_lossy().into_owned();
            let source = std::fs::read_to_string(&file)
                .map_err(|e| format!("cannot read {path}: {e}"))?;
            let module =
                sable_emitter::compile(&source, &path).map_err(|e| e.to_string())?;
            let out_path = output.unwrap_or_else(|| file.with_extension("sbc"));
            let bytes = module.to_bytes().map_err(|e| e.to_string())?;
            std::fs::write(&out_path, bytes)
                .map_err(|e| format!("cannot write {}: {e}", out_path.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Disasm { file } => {
            let path = file.to_string_lossy().into_owned();
            let source = std::fs::read_to_string(&file)
                .map_err(|e| format!("cannot read {path}: {e}"))?;
            let module =
                sable_emitter::compile(&source, &path).map_err(|e| e.to_string())?;
            print!("{}", module.disassemble());
            Ok(ExitCode::SUCCESS)
        }
    }
}
