//! tarn - REPL and script driver for the Tarn scripting engine
//!
//! With a script argument, runs it form by form and exits with a status
//! the test harness can dispatch on: 0 success, 1 assertion failure,
//! 2 runtime error, 3 type-mismatch error. `assert!` and `assert-eq!`
//! natives are registered for script-level tests.
//!
//! Without arguments, starts an interactive line-edited REPL: each line
//! is read, echoed in parsed form, macro-expanded, evaluated, and
//! printed; errors are reported without ending the session.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use tarn_runtime::{Error, NIL, Result, Runtime, RuntimeOptions, TRUE, Value, car, cdr};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tarn")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tarn - embeddable Lisp interpreter", long_about = None)]
struct Cli {
    /// Script file to run; starts an interactive REPL when omitted
    script: Option<PathBuf>,

    /// Arena byte budget, overriding the config file
    #[arg(long)]
    heap_size: Option<usize>,

    /// Skip loading the embedded standard library
    #[arg(long)]
    no_stdlib: bool,

    /// Engine configuration file (TOML)
    #[arg(long, default_value = "tarn.toml")]
    config: PathBuf,

    /// Collect garbage after every top-level form and print arena sizes
    #[arg(long)]
    gc_each_form: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("TARN_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut options = if cli.config.exists() {
        match RuntimeOptions::from_toml_file(&cli.config) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("error: cannot load {}: {e}", cli.config.display());
                return ExitCode::from(2);
            }
        }
    } else {
        RuntimeOptions::default()
    };
    if let Some(bytes) = cli.heap_size {
        options.heap_size = bytes;
    }
    if cli.no_stdlib {
        options.load_stdlib = false;
    }

    let rt = match Runtime::new(options) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot construct runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.script {
        Some(path) => run_script(rt, &path, cli.gc_each_form),
        None => run_repl(rt),
    }
}

// =============================================================================
// Script driver
// =============================================================================

fn assert_native(rt: &mut Runtime, args: Value, _data: *mut ()) -> Result<Value> {
    let v = car(args)?;
    if v != TRUE {
        eprint!("assertion failed! value = {}", rt.write_value(v));
        print_extra_message(rt, cdr(args).unwrap_or(NIL));
        eprintln!();
        std::process::exit(1);
    }
    Ok(NIL)
}

fn assert_eq_native(rt: &mut Runtime, args: Value, _data: *mut ()) -> Result<Value> {
    let a = car(args)?;
    let b = car(cdr(args)?)?;
    if a != b {
        eprint!("assertion failed! {} != {}", rt.write_value(a), rt.write_value(b));
        print_extra_message(rt, cdr(cdr(args)?).unwrap_or(NIL));
        eprintln!();
        std::process::exit(1);
    }
    Ok(NIL)
}

fn print_extra_message(rt: &Runtime, rest: Value) {
    if let Ok(msg) = car(rest) {
        eprint!(": {}", rt.write_value(msg));
    }
}

fn run_script(mut rt: Runtime, path: &Path, gc_each_form: bool) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", path.display());
            return ExitCode::from(2);
        }
    };

    if rt.define_fn("assert!", assert_native).is_err()
        || rt.define_fn("assert-eq!", assert_eq_native).is_err()
    {
        eprintln!("error: cannot register assertion natives");
        return ExitCode::from(2);
    }

    let forms = match rt.read_all(&source) {
        Ok(forms) => forms,
        Err(e) => return report_fatal(&rt, &e),
    };

    let mut cur = forms;
    while !cur.is_nil() {
        let form = match car(cur) {
            Ok(f) => f,
            Err(e) => return report_fatal(&rt, &e),
        };
        let outcome = rt.expand(form).and_then(|f| rt.eval(f));
        if let Err(e) = outcome {
            return report_fatal(&rt, &e);
        }
        if gc_each_form {
            match rt.collect_garbage() {
                Ok(stats) => eprintln!("gc: {} -> {} bytes", stats.old_size, stats.new_size),
                Err(e) => return report_fatal(&rt, &e),
            }
        }
        cur = match cdr(cur) {
            Ok(rest) => rest,
            Err(e) => return report_fatal(&rt, &e),
        };
    }
    ExitCode::SUCCESS
}

fn report_fatal(rt: &Runtime, e: &Error) -> ExitCode {
    report_error(rt, e);
    match e {
        Error::TypeMismatch { .. } => ExitCode::from(3),
        _ => ExitCode::from(2),
    }
}

fn report_error(rt: &Runtime, e: &Error) {
    eprintln!("error: {e}");
    if let Error::TypeMismatch { trace, .. } = e {
        let mut cur = *trace;
        while let (Ok(expr), Ok(rest)) = (car(cur), cdr(cur)) {
            eprintln!("  in {}", rt.write_value(expr));
            cur = rest;
        }
    }
}

// =============================================================================
// Interactive REPL
// =============================================================================

fn eval_line(rt: &mut Runtime, line: &str) -> Result<(Value, Value)> {
    let form = rt.read(line)?;
    let form = rt.expand(form)?;
    let result = rt.eval(form)?;
    Ok((form, result))
}

fn run_repl(mut rt: Runtime) -> ExitCode {
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(ed) => ed,
        Err(e) => {
            eprintln!("error: cannot initialize line editor: {e}");
            return ExitCode::from(2);
        }
    };
    let history = home::home_dir().map(|h| h.join(".tarn_history"));
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline("tarn> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match eval_line(&mut rt, &line) {
                    Ok((form, result)) => {
                        println!(" -> {}", rt.write_value(form));
                        println!("  = {}", rt.write_value(result));
                    }
                    Err(e) => report_error(&rt, &e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
    ExitCode::SUCCESS
}
