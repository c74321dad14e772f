use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::env;
use std::panic;
use std::process;
use std::sync::Arc;
use sympl::stdlib::system_assembly;
use sympl::value::Expando;
use sympl::{Error, ParseErrorKind, Runtime, Value};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("SYMPL_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    let rt = Runtime::builder().assembly(system_assembly()).build();
    rt.register_function::<(), Value, _>("help", print_help);
    let module = rt.create_scope("repl");

    // A file argument runs before the prompt; its definitions stay visible.
    if let Some(path) = env::args().nth(1) {
        match rt.execute_file(&path) {
            Ok(loaded) => {
                println!("Loaded {path}");
                copy_members(&loaded, &module);
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    println!("Sympl interactive console");
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            return;
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "sympl> " } else { "  ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if pending.is_empty() {
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);
                    match trimmed.split_once(' ').unwrap_or((trimmed, "")) {
                        (":help", _) => {
                            _ = print_help().is_ok();
                            continue;
                        }
                        (":globals", _) => {
                            print_globals(&rt, &module);
                            continue;
                        }
                        (":load", path) => {
                            match rt.execute_file(path.trim()) {
                                Ok(loaded) => {
                                    copy_members(&loaded, &module);
                                    println!("Loaded {}", path.trim());
                                }
                                Err(e) => println!("Error: {e}"),
                            }
                            continue;
                        }
                        (":quit" | ":exit", _) => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');
                match rt.execute_string(&pending, &module) {
                    // keep reading until the form is closed
                    Err(Error::ParseError(e)) if e.kind == ParseErrorKind::Incomplete => continue,
                    Ok(value) => println!("{value}"),
                    Err(e) => println!("Error: {e}"),
                }
                pending.clear();
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Make a loaded file's definitions available at the prompt.
fn copy_members(from: &Arc<Expando>, to: &Arc<Expando>) {
    for name in from.member_names() {
        if name != "__file__"
            && let Some(value) = from.get(&name)
        {
            to.set(&name, value);
        }
    }
}

fn print_help() -> Result<Value, Error> {
    println!("Sympl interactive console:");
    println!("  :help         - Show this help message");
    println!("  :globals      - Show global namespaces and the REPL's own bindings");
    println!("  :load <file>  - Execute a .sympl file and import its definitions");
    println!("  :quit         - Exit the interpreter");
    println!("  Ctrl+C        - Cancel a multi-line form, or exit");
    println!();
    println!("Forms:");
    println!("  (defun name (params) body...)    (lambda (params) body...)");
    println!("  (set name value)                 (let* ((name value)...) body...)");
    println!("  (if test then [else])            (loop body... (break [value]))");
    println!("  (list a b)  (cons a b)  (elt list i)  (eq a b)  'quoted");
    println!("  (import system.math)             (new text.stringbuilder \"a\")");
    println!("  obj.member  obj.(method args)    (obj.method args)");
    println!();
    println!("Examples:");
    println!("  (defun add (a b) (+ a b))");
    println!("  (add 2 3)");
    println!("  (import system.math) (math.max 3 4)");
    println!();

    Ok(Value::Nil)
}

fn print_globals(rt: &Runtime, module: &Arc<Expando>) {
    let globals = rt.globals();
    println!("Global namespaces and modules ({} total):", globals.len());
    let mut col = 0;
    for name in globals.member_names() {
        print!("  {name:<15}");
        col += 1;
        if col % 4 == 0 {
            println!();
        }
    }
    if col % 4 != 0 {
        println!();
    }
    println!();

    if module.is_empty() {
        println!("No bindings defined at the prompt.");
        return;
    }
    println!("Bindings ({}):", module.len());
    for name in module.member_names() {
        if let Some(value) = module.get(&name) {
            println!("  {name} = {value}");
        }
    }
}
