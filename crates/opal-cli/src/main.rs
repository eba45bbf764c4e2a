//! Command-line driver: compile a source file, dump the machine code as
//! hex, and invoke the requested function.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use opal_jit::Jit;

#[derive(Parser)]
#[command(name = "opal", about = "Baseline JIT for the opal language")]
struct Args {
    /// Source file to compile.
    source: PathBuf,

    /// Integer arguments passed to the invoked function.
    args: Vec<i32>,

    /// Function to compile and invoke.
    #[arg(long, default_value = "main")]
    function: String,

    /// Print the function's IR.
    #[arg(long)]
    dump_ir: bool,

    /// Compile and dump only; skip the invocation.
    #[arg(long)]
    no_run: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

type CliError = Box<dyn std::error::Error>;

fn run(args: Args) -> Result<(), CliError> {
    let source = std::fs::read_to_string(&args.source)?;
    let mut jit = Jit::new();
    jit.add_source(&source)?;

    let fname = opal_jit::name(&args.function);
    if args.dump_ir {
        print!("{}", jit.dump_ir(fname)?);
    }
    println!("{}", jit.dump_function(fname)?);

    if args.no_run {
        return Ok(());
    }
    invoke(&mut jit, &args)
}

#[cfg(target_arch = "x86_64")]
fn invoke(jit: &mut Jit, args: &Args) -> Result<(), CliError> {
    let value = jit.invoke(opal_jit::name(&args.function), &args.args)?;
    if value.is_error() {
        return Err(format!("function '{}' raised a runtime error", args.function).into());
    }
    if value.is_int() {
        println!("{}", value.as_i32());
    } else {
        println!("0x{:016x}", value.raw());
    }
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
fn invoke(_jit: &mut Jit, _args: &Args) -> Result<(), CliError> {
    Err("invoking compiled code requires an x86-64 host (use --no-run)".into())
}
