use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use indexmap::IndexMap;

use mext::{config, MextError, Parser, Value};

#[derive(ClapParser)]
#[command(name = "mext", about = "Compose prompts from templates, directives, and includes.")]
struct Cli {
    /// Template file to render.
    template_file: PathBuf,

    /// Write the rendered output here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// A JSON or YAML file of params, merged left to right. Repeatable.
    #[arg(short, long = "params")]
    params: Vec<PathBuf>,

    /// Print every chunk the interpreter emits to stderr as it renders.
    #[arg(long)]
    trace: bool,
}

fn load_params(paths: &[PathBuf]) -> Result<IndexMap<String, Value>, MextError> {
    let mut merged = IndexMap::new();
    for path in paths {
        let loaded = config::load_config(path)?;
        if let Value::Map(m) = loaded {
            merged.extend(m);
        }
    }
    Ok(merged)
}

fn run(cli: Cli) -> Result<(), MextError> {
    let params = load_params(&cli.params)?;

    let mut parser = Parser::new();
    parser.enable_trace(cli.trace);
    let output = parser.render_file(&cli.template_file, params, IndexMap::new())?;

    if cli.trace {
        for entry in parser.trace() {
            eprintln!(
                "[{}] {:?}/{:?} -> {:?}",
                entry.pos_index, entry.keyword, entry.field_name, entry.chunk
            );
        }
    }

    match cli.output {
        Some(path) => std::fs::write(&path, output).map_err(|source| MextError::Io {
            path: path.display().to_string(),
            source,
        })?,
        None => println!("{output}"),
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
