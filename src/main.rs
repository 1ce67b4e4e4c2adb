//! The `lwscript` command-line driver: run a source file, dump an
//! intermediate pipeline stage, or fall into a line-oriented REPL.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser as ClapParser;

use lwscript::compiler::compile::Compiler;
use lwscript::compiler::lex::Lexer;
use lwscript::compiler::optimize::optimize;
use lwscript::compiler::parse::Parser;
use lwscript::error::InterpretError;
use lwscript::vm::vm::VM;

/// A small dynamically-typed scripting language with a stack-based
/// bytecode virtual machine.
#[derive(clap::Parser)]
#[command(name = "lwscript", version, about)]
struct Cli {
    /// Source file to run. Omit to start a REPL.
    path: Option<PathBuf>,

    /// Print the token stream and exit without compiling or running.
    #[arg(long)]
    dump_tokens: bool,

    /// Print the parsed (optimized) AST and exit without compiling or running.
    #[arg(long)]
    dump_ast: bool,

    /// Print the compiled bytecode frame and exit without running.
    #[arg(long)]
    dump_bytecode: bool,

    /// Disable the AST constant-folding optimizer.
    #[arg(long)]
    no_optimize: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let Some(path) = cli.path.clone() else {
        return repl();
    };

    let source = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lwscript: couldn't read '{}': {e}", path.display());
            return ExitCode::from(74);
        }
    };

    match run_once(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run_once(cli: &Cli, source: &str) -> Result<(), InterpretError> {
    let tokens = Lexer::lex(source)?;
    if cli.dump_tokens {
        for token in &tokens {
            println!("{token:?}");
        }
        return Ok(());
    }

    let ast = Parser::parse(tokens)?;
    let ast = optimize(ast, !cli.no_optimize);
    if cli.dump_ast {
        println!("{ast:#?}");
        return Ok(());
    }

    let frame = Compiler::compile(&ast)?;
    if cli.dump_bytecode {
        println!("{frame:#?}");
        return Ok(());
    }

    let mut vm = VM::new();
    vm.interpret(Rc::new(frame))?;
    Ok(())
}

/// A line-oriented REPL sharing one `VM` across inputs: each line is
/// lexed, parsed, optimized, and compiled into a fresh root frame, then
/// run against the same `VM` so top-level bindings persist.
fn repl() -> ExitCode {
    println!("lwscript {} — Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
    let mut vm = VM::new();
    let mut line = String::new();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::FAILURE;
        }
        line.clear();
        match io::stdin().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(e) => {
                eprintln!("lwscript: read error: {e}");
                return ExitCode::FAILURE;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        match lwscript::eval(&mut vm, &line) {
            Ok(value) => println!("{}", vm.display_value(&value)),
            Err(e) => eprintln!("{e}"),
        }
    }
}
