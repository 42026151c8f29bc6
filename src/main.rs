use std::{path::PathBuf, process::ExitCode};

use clap::{error::ErrorKind, CommandFactory, Parser as ClapParser, ValueEnum};
use colored::Colorize;
use nestc::{
    backend::{pretty_print::pretty_print, Target},
    frontend::{parse_file, SourceFile, SourceFileOrigin},
    middle::passes::{Compiler, CompilerOptions},
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// C++ source for the selected runtime
    Cpp,
    /// The lowered tree in its textual form
    Ast,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_files: Vec<PathBuf>,

    /// Procedure the host calls into
    #[arg(long, default_value = "entry")]
    entry: String,

    /// Runtime the generated code is compiled against (cuda, omp, tbb, cpp)
    #[arg(long, default_value_t = Target::Cuda)]
    target: Target,

    #[arg(long, value_enum, default_value_t = Emit::Cpp)]
    emit: Emit,

    /// Write the output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn report(source: &SourceFile, message: &str) {
    eprintln!("{} {message} ({})", "error:".red().bold(), source.origin);
}

/// Compiles one translation unit. Errors are reported as they are found.
fn compile_unit(source: &SourceFile, args: &Args) -> Option<String> {
    let unit = match parse_file(source) {
        Ok(unit) => unit,
        Err(error) => {
            eprintln!(
                "{} {} ({}:{}:{})",
                "error:".red().bold(),
                error,
                source.origin,
                source.row_for_position(error.span.start),
                source.column_for_position(error.span.start)
            );
            eprintln!("{}", source.highlight_span(error.span));
            return None;
        }
    };

    debug!(
        origin = %source.origin,
        procedures = unit.module.procedures().count(),
        registered = unit.registry.len(),
        "parsed unit"
    );

    let options = CompilerOptions {
        entry_point: args.entry.as_str().into(),
    };

    let output = match Compiler::new(options, &unit.registry).compile(&unit.module) {
        Ok(output) => output,
        Err(error) => {
            report(source, &error.to_string());
            return None;
        }
    };

    match args.emit {
        Emit::Ast => Some(output.module.to_string()),
        Emit::Cpp => match pretty_print(&output.module, args.target) {
            Ok(text) => Some(text),
            Err(error) => {
                report(source, &error.to_string());
                None
            }
        },
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(args.verbose);

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let mut output = String::new();
    let mut failed = false;

    for path in &args.source_files {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                eprintln!(
                    "{} failed to read '{}': {error}",
                    "error:".red().bold(),
                    path.display()
                );
                failed = true;
                continue;
            }
        };

        let source = SourceFile {
            contents,
            origin: SourceFileOrigin::File(path.clone()),
        };

        match compile_unit(&source, &args) {
            Some(text) => output.push_str(&text),
            None => failed = true,
        }
    }

    match &args.output {
        Some(path) => {
            if let Err(error) = std::fs::write(path, strip_ansi_escapes::strip_str(&output)) {
                eprintln!(
                    "{} failed to write '{}': {error}",
                    "error:".red().bold(),
                    path.display()
                );
                return ExitCode::FAILURE;
            }

            info!(path = %path.display(), "wrote output");
        }
        None => print!("{output}"),
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
