#![warn(clippy::unwrap_used)]

mod emit;
mod parser;

use std::path::PathBuf;

use clap::{Parser as ClapParser, ValueEnum};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Binary,
    Carray,
}

/// Compiles a text interface description into the binary schema blob that
/// irmo-server/irmo-client load at startup.
#[derive(ClapParser, Debug, Clone)]
#[clap(author, version, about)]
struct Args {
    /// Interface description to compile.
    input: PathBuf,

    /// Output file. Defaults to interface.out; format is then guessed from
    /// the extension (.c/.cpp/.m -> carray, anything else -> binary).
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Output format. If not given, guessed from the output filename.
    #[clap(short, long)]
    format: Option<OutputFormat>,

    /// Name of the array in carray output. Defaults to interface_<basename>.
    #[clap(short, long)]
    array_name: Option<String>,
}

fn ends_with_any(path: &std::path::Path, stems: &[&str]) -> bool {
    let name = path.to_string_lossy();
    stems.iter().any(|stem| name.ends_with(stem))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(env_filter)
        .init();

    let args = Args::parse();

    let output_path = args.output.clone().unwrap_or_else(|| PathBuf::from("interface.out"));
    let format = args.format.unwrap_or_else(|| {
        if ends_with_any(&output_path, &[".c", ".cpp", ".m"]) {
            OutputFormat::Carray
        } else {
            OutputFormat::Binary
        }
    });

    let source = std::fs::read_to_string(&args.input)
        .wrap_err_with(|| format!("reading interface description {}", args.input.display()))?;

    let interface = parser::parse(&source).map_err(|e| eyre!("{}:{e}", args.input.display()))?;
    tracing::info!(
        classes = interface.num_classes(),
        methods = interface.num_methods(),
        hash = interface.hash(),
        "compiled interface"
    );

    let blob = interface.dump();

    match format {
        OutputFormat::Binary => {
            std::fs::write(&output_path, &blob)
                .wrap_err_with(|| format!("writing {}", output_path.display()))?;
        }
        OutputFormat::Carray => {
            let name = args.array_name.unwrap_or_else(|| emit::default_array_name(&args.input));
            let source = emit::c_array(&name, &blob);
            std::fs::write(&output_path, source)
                .wrap_err_with(|| format!("writing {}", output_path.display()))?;
        }
    }

    tracing::info!(path = %output_path.display(), "wrote schema");
    Ok(())
}
