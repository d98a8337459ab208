//! loom-cli — demonstration harness for `compile`/`run`/`disassemble`/
//! `resume`, wrapping the core/compiler/vm crates behind a thin `clap`
//! surface. Not part of the contractual interface: a host embedding the
//! language links `loom-core`/`loom-compiler`/`loom-vm` directly and can
//! ignore this binary entirely.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use loom_vm::{NativeRegistry, RunOutcome, Snapshot, SyscallRegistry, Vm};

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Compile { file, out } => cmd_compile(file, out),
        Cmd::Run { file, steps } => cmd_run(file, steps),
        Cmd::Disassemble { file } => cmd_disassemble(file),
        Cmd::Resume { snapshot, value } => cmd_resume(snapshot, value),
    }
}

#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "Loom language tool: compile, run, disassemble, resume")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile a source file to a bytecode program (`.loomc`).
    Compile {
        file: Utf8PathBuf,
        #[arg(short, long)]
        out: Option<Utf8PathBuf>,
    },
    /// Compile and run a source file, stopping at the first syscall trap.
    Run {
        file: Utf8PathBuf,
        /// Cooperative step budget; omit for unlimited.
        #[arg(long)]
        steps: Option<u64>,
    },
    /// Compile a source file and print its disassembly.
    Disassemble { file: Utf8PathBuf },
    /// Resume a previously captured snapshot with a host-supplied return value.
    Resume {
        snapshot: Utf8PathBuf,
        /// Numeric return value to push for the pending syscall, if any.
        #[arg(long)]
        value: Option<f64>,
    },
}

fn read_source(file: &Utf8PathBuf) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("reading '{file}'"))
}

fn cmd_compile(file: Utf8PathBuf, out: Option<Utf8PathBuf>) -> Result<()> {
    let source = read_source(&file)?;
    let program = loom_compiler::compile(&source).map_err(|e| anyhow::anyhow!("{e}"))?;
    let bytes = program.to_bytes().map_err(|e| anyhow::anyhow!("{e}"))?;
    let out = out.unwrap_or_else(|| file.with_extension("loomc"));
    fs::write(&out, bytes).with_context(|| format!("writing '{out}'"))?;
    log::info!("wrote {out}");
    Ok(())
}

fn cmd_run(file: Utf8PathBuf, steps: Option<u64>) -> Result<()> {
    let source = read_source(&file)?;
    let program = loom_compiler::compile(&source).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
    let outcome = vm.run(steps);

    match &outcome {
        RunOutcome::Halted(v) => println!("halted: {v}"),
        RunOutcome::Running => println!("still running (step budget exhausted)"),
        RunOutcome::Error(e) => println!("error at line {}: {e}", e.line()),
        RunOutcome::Syscall(trap) => {
            println!("suspended on syscall '{}' with args {:?}", trap.name, trap.args);
            let snapshot = loom_vm::serialize(&vm, &outcome).map_err(|e| anyhow::anyhow!("{e}"))?;
            let path = file.with_extension("loomsnap");
            fs::write(&path, toml::to_string(&snapshot)?).with_context(|| format!("writing '{path}'"))?;
            println!("snapshot written to {path}");
        }
    }
    Ok(())
}

fn cmd_disassemble(file: Utf8PathBuf) -> Result<()> {
    let source = read_source(&file)?;
    let program = loom_compiler::compile(&source).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", program.disassemble(file.as_str()));
    Ok(())
}

fn cmd_resume(snapshot_path: Utf8PathBuf, value: Option<f64>) -> Result<()> {
    let text = fs::read_to_string(&snapshot_path).with_context(|| format!("reading '{snapshot_path}'"))?;
    let snapshot: Snapshot = toml::from_str(&text).with_context(|| format!("parsing '{snapshot_path}'"))?;

    let mut vm = loom_vm::deserialize(
        &snapshot,
        NativeRegistry::stdlib(),
        SyscallRegistry::with_generic(),
        value.map(loom_core::Value::Number),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let outcome = vm.run(None);
    match &outcome {
        RunOutcome::Halted(v) => println!("halted: {v}"),
        RunOutcome::Running => println!("still running"),
        RunOutcome::Error(e) => println!("error at line {}: {e}", e.line()),
        RunOutcome::Syscall(trap) => {
            println!("suspended again on syscall '{}' with args {:?}", trap.name, trap.args);
            let snapshot = loom_vm::serialize(&vm, &outcome).map_err(|e| anyhow::anyhow!("{e}"))?;
            fs::write(&snapshot_path, toml::to_string(&snapshot)?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_run_disassemble_round_trip() {
        let dir = std::env::temp_dir().join(format!("loom-cli-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = Utf8PathBuf::from_path_buf(dir.join("prog.loom")).unwrap();
        fs::write(&file, "let a = 1 + 2; syscall(\"r\", a);").unwrap();

        cmd_disassemble(file.clone()).unwrap();
        cmd_run(file.clone(), None).unwrap();
        assert!(file.with_extension("loomsnap").exists());

        fs::remove_dir_all(&dir).ok();
    }
}
