//! mpyship CLI - MicroPython package archiver

use clap::{Parser, Subcommand};
use mpyship::board::inspect::BoardCaps;
use mpyship::manifest::Manifest;
use mpyship::packager::{Packager, PackagerConfig};
use mpyship::resolver::{ManifestResolver, DEFAULT_INDEX_URL};
use mpyship::source::PackageSource;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mpyship")]
#[command(author, version, about = "MicroPython package archiver", long_about = None)]
struct Cli {
    /// Package index base URL
    #[arg(long, global = true, default_value = DEFAULT_INDEX_URL)]
    index: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package archive without a board
    Package {
        /// Package source (repo URL, github:/gitlab: short form, or index name)
        url: String,
        /// Version or git ref (default: latest)
        #[arg(long, short)]
        version: Option<String>,
        /// Path to a manifest JSON overriding the root package.json
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Output directory for the archive
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Cross-compile sources with mpy-cross
        #[arg(long)]
        compile: bool,
        /// Target architecture passed to the compiler (e.g. xtensa)
        #[arg(long)]
        arch: Option<String>,
        /// Target bytecode format version
        #[arg(long)]
        mpy_format: Option<u8>,
    },
    /// Print the files a source resolves to
    Resolve {
        /// Package source
        url: String,
        /// Version or git ref (default: latest)
        #[arg(long, short)]
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> mpyship::Result<()> {
    match cli.command {
        Commands::Package {
            url,
            version,
            manifest,
            output,
            compile,
            arch,
            mpy_format,
        } => {
            let custom_manifest = manifest.as_deref().map(Manifest::load).transpose()?;
            let caps = (arch.is_some() || mpy_format.is_some()).then(|| BoardCaps {
                architecture: arch,
                mpy_format,
                ..Default::default()
            });

            let mut config = PackagerConfig::new()
                .with_index_url(cli.index)
                .with_compile(compile);
            if let Some(dir) = output {
                config = config.with_output_dir(dir);
            }

            let built = Packager::new(config)
                .package(&url, version.as_deref(), custom_manifest, caps.as_ref())
                .await?;

            println!("{}", built.archive_path.display());
            for file in &built.package_files {
                println!("  {file}");
            }
            Ok(())
        }
        Commands::Resolve { url, version } => {
            let source = PackageSource::parse(&url)?;
            let resolver = ManifestResolver::new(reqwest::Client::new(), cli.index);
            let resolved = resolver.resolve(&source, version.as_deref(), None).await?;

            for node in &resolved {
                println!("{}", node.source);
                for target in node.manifest.target_paths() {
                    println!("  {target}");
                }
            }
            Ok(())
        }
    }
}
