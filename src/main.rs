//! FPAA Circuit Compiler CLI
//!
//! Usage:
//!   fpaa program.json
//!   fpaa program.json --architecture mini --commands
//!   fpaa program.json --machine my_machine.json --json -o config.json
//!   fpaa --list

use clap::Parser as ClapParser;
use colored::Colorize;
use std::fs;
use std::io::{self, Read};
use tracing_subscriber::{fmt, EnvFilter};

use fpaa_compiler::{architectures, Compiler, HardwareConfig, Machine, Program};

#[derive(ClapParser, Debug)]
#[command(name = "fpaa")]
#[command(author = "FPAA Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles analog computer programs to FPAA configurations")]
struct Args {
    /// Program document (JSON); reads stdin when omitted
    #[arg(value_name = "PROGRAM")]
    program: Option<String>,

    /// Built-in target architecture
    #[arg(short = 'A', long = "architecture", default_value = "mini")]
    architecture: String,

    /// Machine description (JSON), overrides --architecture
    #[arg(short = 'a', long = "machine")]
    machine_file: Option<String>,

    /// List the built-in architectures and exit
    #[arg(long = "list")]
    list: bool,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Output device commands, one per line
    #[arg(short = 'c', long = "commands")]
    commands: bool,

    /// Draw crossbar switch matrices
    #[arg(short = 'd', long = "diagram")]
    diagram: bool,

    /// Print the compilation trace
    #[arg(short = 't', long = "trace")]
    trace: bool,

    /// Write output to a file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Verbose logging (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},fpaa_compiler={}", level, level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn fail(what: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red(), err);
    std::process::exit(1);
}

fn load_machine(args: &Args) -> Machine {
    match &args.machine_file {
        Some(path) => {
            let source = fs::read_to_string(path)
                .unwrap_or_else(|e| fail("Error", format!("Failed to read machine '{}': {}", path, e)));
            Machine::from_json(&source).unwrap_or_else(|e| fail("Machine error", e))
        }
        None => architectures::by_name(&args.architecture).unwrap_or_else(|| {
            fail(
                "Error",
                format!(
                    "unknown architecture '{}' (available: {})",
                    args.architecture,
                    architectures::REGISTERED.join(", ")
                ),
            )
        }),
    }
}

fn load_program(args: &Args) -> Program {
    let source = match &args.program {
        Some(path) => fs::read_to_string(path)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read program '{}': {}", path, e))),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .unwrap_or_else(|e| fail("Error", format!("Failed to read stdin: {}", e)));
            buffer
        }
    };
    Program::from_json(&source).unwrap_or_else(|e| fail("Program error", e))
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list {
        println!("{}", "Built-in architectures".bold().green());
        for name in architectures::REGISTERED {
            if let Some(machine) = architectures::by_name(name) {
                println!(
                    "  {:8} {} ({} parts)",
                    name.cyan(),
                    machine.title,
                    machine.configurable_parts.len()
                );
            }
        }
        return;
    }

    let machine = load_machine(&args);
    let program = load_program(&args);

    let compiler = Compiler::new(&machine).unwrap_or_else(|e| fail("Machine error", e));
    let config = compiler
        .compile(&program)
        .unwrap_or_else(|e| fail("Compilation error", e));

    let rendered = if args.json_output {
        config
            .to_json()
            .unwrap_or_else(|e| fail("Error", format!("Failed to serialize to JSON: {}", e)))
    } else if args.commands {
        config.command_stream()
    } else {
        render_report(&config, &args)
    };

    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .unwrap_or_else(|e| fail("Error", format!("Failed to write '{}': {}", path, e)));
            println!("{} {}", "Wrote".green(), path);
        }
        None => print!("{}", rendered),
    }
}

fn render_report(config: &HardwareConfig, args: &Args) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Compilation Results".bold().green()));
    out.push_str(&format!("{}\n\n", "=".repeat(50)));
    out.push_str(&config.to_string());

    if args.diagram {
        out.push_str(&format!("\n{}\n", "Crossbars".bold().yellow()));
        out.push_str(&format!("{}\n", "-".repeat(50)));
        out.push_str(&config.diagram());
    }

    if args.trace {
        out.push_str(&format!("\n{}\n", "Trace".bold().yellow()));
        out.push_str(&format!("{}\n", "-".repeat(50)));
        out.push_str(&config.trace.to_string());
    }

    out.push_str(&format!("\n{}\n", "Commands".bold().yellow()));
    out.push_str(&format!("{}\n", "-".repeat(50)));
    out.push_str(&config.command_stream());
    out
}
