//! Swarm compiler CLI.
//!
//! Provides the `swarmc` binary. The out-of-scope frontend hands programs
//! over as position-annotated AST JSON; `compile` lowers one to textual ISA,
//! `run` compiles (or loads a textual-ISA file directly) and executes it,
//! `cfg` emits the control-flow graph as DOT, and `dump-ast` pretty-prints
//! the analyzed AST.
//!
//! Exit codes: 0 success, 1 parse/analysis failure, 2 runtime failure,
//! 3 CLI misuse (unreadable input, malformed flags).

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use swarm_codegen::{optimize, LowerOptions, OptimizeOptions};
use swarm_core::ast::Program;
use swarm_core::symbol::SymbolArena;
use swarm_isa::Instructions;
use swarm_vm::{VirtualMachine, VmConfig};

/// Swarm compiler and tools.
#[derive(Parser)]
#[command(name = "swarmc", about = "Swarm compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: GlobalOptions,
}

#[derive(Args, Clone)]
struct GlobalOptions {
    /// Keep position annotations and enable verbose logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Disable the constant-propagation pass.
    #[arg(long = "no-const-prop", global = true)]
    no_const_prop: bool,

    /// Disable the self-assignment-removal pass.
    #[arg(long = "no-remove-self-assign", global = true)]
    no_remove_self_assign: bool,

    /// Worker threads for the VM queue.
    #[arg(long = "max-threads", global = true)]
    max_threads: Option<usize>,

    /// Worker poll interval in microseconds.
    #[arg(long = "queue-sleep", global = true)]
    queue_sleep: Option<u64>,

    /// Lock-acquisition attempts before failing.
    #[arg(long = "lock-max-retries", global = true)]
    lock_max_retries: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Compile an AST-JSON program to textual ISA on stdout.
    Compile { input: PathBuf },
    /// Compile and execute a program (AST JSON, or textual ISA with --isa).
    Run {
        input: PathBuf,
        /// Treat the input as textual ISA instead of AST JSON.
        #[arg(long)]
        isa: bool,
    },
    /// Emit the optimized program's control-flow graph as DOT.
    Cfg { input: PathBuf },
    /// Pretty-print the analyzed AST as JSON.
    DumpAst { input: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    let debug = cli.options.debug
        || std::env::var("SWARM_DEBUG")
            .map(|v| !v.is_empty())
            .unwrap_or(false);
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let code = match &cli.command {
        Commands::Compile { input } => run_compile(input, &cli.options),
        Commands::Run { input, isa } => run_run(input, *isa, &cli.options),
        Commands::Cfg { input } => run_cfg(input, &cli.options),
        Commands::DumpAst { input } => run_dump_ast(input),
    };
    process::exit(code);
}

fn vm_config(options: &GlobalOptions) -> VmConfig {
    let mut config = VmConfig::from_env();
    if let Some(n) = options.max_threads {
        config.max_threads = n;
    }
    if let Some(n) = options.queue_sleep {
        config.queue_sleep_us = n;
    }
    if let Some(n) = options.lock_max_retries {
        config.lock_max_retries = n;
    }
    config.debug |= options.debug;
    config
}

fn optimize_options(options: &GlobalOptions) -> OptimizeOptions {
    OptimizeOptions {
        remove_self_assign: !options.no_remove_self_assign,
        const_prop: !options.no_const_prop,
    }
}

fn load_program(input: &PathBuf) -> Result<Program, i32> {
    let text = std::fs::read_to_string(input).map_err(|e| {
        eprintln!("Error: failed to read '{}': {e}", input.display());
        3
    })?;
    serde_json::from_str(&text).map_err(|e| {
        eprintln!("Error: malformed AST in '{}': {e}", input.display());
        1
    })
}

/// Run the analysis stages and lowering over a parsed program.
fn analyze_and_lower(
    mut program: Program,
    options: &GlobalOptions,
) -> Result<(Instructions, SymbolArena), i32> {
    let mut arena = match swarm_check::name_analysis(&mut program) {
        Ok(arena) => arena,
        Err(errors) => {
            report_compile_errors(&errors);
            return Err(1);
        }
    };
    if let Err(errors) = swarm_check::type_analysis(&mut program, &mut arena) {
        report_compile_errors(&errors);
        return Err(1);
    }
    swarm_check::trim_dead_code(&mut program);

    let lower_options = LowerOptions {
        debug: options.debug,
    };
    match swarm_codegen::lower(&program, &arena, &lower_options) {
        Ok(instrs) => Ok((instrs, arena)),
        Err(e) => {
            eprintln!("Error: {e}");
            Err(1)
        }
    }
}

fn report_compile_errors(errors: &[swarm_core::CompileError]) {
    eprintln!("Compilation failed with {} error(s):", errors.len());
    for e in errors {
        eprintln!("  - {e}");
    }
}

fn run_compile(input: &PathBuf, options: &GlobalOptions) -> i32 {
    let program = match load_program(input) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let (instrs, _) = match analyze_and_lower(program, options) {
        Ok(out) => out,
        Err(code) => return code,
    };
    let optimized = optimize(instrs, &optimize_options(options));
    match swarm_isa::write_program(&optimized) {
        Ok(text) => {
            print!("{text}");
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn run_run(input: &PathBuf, as_isa: bool, options: &GlobalOptions) -> i32 {
    let instrs = if as_isa {
        let text = match std::fs::read_to_string(input) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Error: failed to read '{}': {e}", input.display());
                return 3;
            }
        };
        match swarm_isa::parse_program(&text) {
            Ok(instrs) => instrs,
            Err(e) => {
                eprintln!("Error: {e}");
                return 1;
            }
        }
    } else {
        let program = match load_program(input) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let (instrs, _) = match analyze_and_lower(program, options) {
            Ok(out) => out,
            Err(code) => return code,
        };
        optimize(instrs, &optimize_options(options))
    };

    let mut vm = match VirtualMachine::new(instrs, vm_config(options)) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };
    let result = vm.execute();
    for line in vm.io_log() {
        println!("{line}");
    }
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            2
        }
    }
}

fn run_cfg(input: &PathBuf, options: &GlobalOptions) -> i32 {
    let program = match load_program(input) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let (instrs, _) = match analyze_and_lower(program, options) {
        Ok(out) => out,
        Err(code) => return code,
    };
    let mut cfg = swarm_codegen::ControlFlowGraph::build(instrs);
    swarm_codegen::optimize_graph(&mut cfg, &optimize_options(options));
    print!("{}", cfg.to_dot());
    0
}

fn run_dump_ast(input: &PathBuf) -> i32 {
    let mut program = match load_program(input) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let mut arena = match swarm_check::name_analysis(&mut program) {
        Ok(arena) => arena,
        Err(errors) => {
            report_compile_errors(&errors);
            return 1;
        }
    };
    if let Err(errors) = swarm_check::type_analysis(&mut program, &mut arena) {
        report_compile_errors(&errors);
        return 1;
    }
    match serde_json::to_string_pretty(&program) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize AST: {e}");
            1
        }
    }
}
