//! Brook CLI: run compiled units, inspect them, or bundle them into a
//! self-contained executable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

use brook::config::{VmConfig, LOG_ENV};
use brook::error::BrookError;
use brook::vm::{serializer, CompiledUnit, Value};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Run a serialized unit
    Run { file: PathBuf },
    /// Print the disassembly of a serialized unit
    Disasm { file: PathBuf },
    /// Append a unit to this binary, producing a standalone executable
    Build { file: PathBuf, output: PathBuf },
    /// Print usage
    Help,
    /// Print the version
    Version,
}

fn print_usage() {
    eprintln!("Brook {} - bytecode VM", VERSION);
    eprintln!();
    eprintln!("Usage: brook <unit.bkc>");
    eprintln!("       brook run <unit.bkc>");
    eprintln!("       brook disasm <unit.bkc>");
    eprintln!("       brook build <unit.bkc> -o <executable>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  BROOK_LOG         Log filter (default: warn)");
    eprintln!("  BROOK_STACK_SIZE  Operand stack capacity");
    eprintln!("  BROOK_MAX_FRAMES  Maximum call depth");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{} {}", "error:".red().bold(), message);
    print_usage();
    process::exit(64);
}

fn parse_args(args: &[String]) -> Command {
    let Some(first) = args.first() else {
        return Command::Help;
    };

    match first.as_str() {
        "-h" | "--help" | "help" => Command::Help,
        "-V" | "--version" => Command::Version,
        "run" => match args.get(1) {
            Some(file) => Command::Run {
                file: PathBuf::from(file),
            },
            None => usage_error("run requires a unit file"),
        },
        "disasm" => match args.get(1) {
            Some(file) => Command::Disasm {
                file: PathBuf::from(file),
            },
            None => usage_error("disasm requires a unit file"),
        },
        "build" => {
            let mut file = None;
            let mut output = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "-o" | "--output" => {
                        i += 1;
                        match args.get(i) {
                            Some(path) => output = Some(PathBuf::from(path)),
                            None => usage_error("-o requires a path"),
                        }
                    }
                    other if other.starts_with('-') => {
                        usage_error(&format!("unknown option '{}'", other))
                    }
                    other => file = Some(PathBuf::from(other)),
                }
                i += 1;
            }
            match (file, output) {
                (Some(file), Some(output)) => Command::Build { file, output },
                (None, _) => usage_error("build requires a unit file"),
                (_, None) => usage_error("build requires -o <executable>"),
            }
        }
        other if other.starts_with('-') => usage_error(&format!("unknown option '{}'", other)),
        file => Command::Run {
            file: PathBuf::from(file),
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();

    // A binary produced by `brook build` carries its program in a trailer.
    match env::current_exe().map(serializer::read_embedded) {
        Ok(Ok(Some(unit))) => {
            tracing::debug!("running embedded unit");
            exit_with(execute(&unit));
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => fail(BrookError::from(e)),
        Err(e) => tracing::debug!("cannot locate current executable: {}", e),
    }

    let args: Vec<String> = env::args().skip(1).collect();
    match parse_args(&args) {
        Command::Help => print_usage(),
        Command::Version => println!("brook {}", VERSION),
        Command::Run { file } => match load_unit(&file) {
            Ok(unit) => exit_with(execute(&unit)),
            Err(e) => fail(e),
        },
        Command::Disasm { file } => match load_unit(&file) {
            Ok(unit) => print!("{}", brook::disassemble(&unit)),
            Err(e) => fail(e),
        },
        Command::Build { file, output } => {
            if let Err(e) = build_executable(&file, &output) {
                fail(e);
            }
            println!("{} {}", "Built".green().bold(), output.display());
        }
    }
}

fn load_unit(path: &Path) -> Result<CompiledUnit, BrookError> {
    let bytes = fs::read(path)?;
    Ok(serializer::deserialize(&bytes)?)
}

fn execute(unit: &CompiledUnit) -> Result<Value, BrookError> {
    brook::run_unit(unit, VmConfig::from_env())
}

fn exit_with(result: Result<Value, BrookError>) -> ! {
    match result {
        Ok(_) => process::exit(0),
        Err(e) => fail(e),
    }
}

fn fail(error: BrookError) -> ! {
    eprintln!("{} {}", "error:".red().bold(), error);
    process::exit(70);
}

fn build_executable(unit_path: &Path, output: &Path) -> Result<(), BrookError> {
    let unit = load_unit(unit_path)?;
    let host_path = env::current_exe()?;
    let host = fs::read(&host_path)?;
    // Rebuilding from a bundled binary must not stack trailers.
    let host = strip_payload(host)?;
    let bundled = serializer::append_payload(&host, &unit)?;
    fs::write(output, bundled)?;
    make_executable(output)?;
    tracing::info!(
        "bundled {} into {}",
        unit_path.display(),
        output.display()
    );
    Ok(())
}

fn strip_payload(host: Vec<u8>) -> Result<Vec<u8>, BrookError> {
    match serializer::payload_offset(&host)? {
        Some(offset) => Ok(host[..offset].to_vec()),
        None => Ok(host),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
