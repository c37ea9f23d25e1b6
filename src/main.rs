use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use treepatch::{CompressionAlgorithm, CompressionSettings, Patch, Signature, Wound};

#[derive(Parser)]
#[command(name = "treepatch", about = "Sign, diff, apply and verify directory trees")]
struct Cli {
    /// Log more (-v info, -vv debug). RUST_LOG is used when absent.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Compression {
    None,
    Brotli,
    Gzip,
    Zstd,
}

#[derive(clap::Args)]
struct CompressionArgs {
    /// Body compression of the written file
    #[arg(long, value_enum, default_value = "brotli")]
    compression: Compression,
    /// Compression quality (brotli: 1-11)
    #[arg(long, default_value_t = 1)]
    quality: i32,
}

impl CompressionArgs {
    fn settings(&self) -> CompressionSettings {
        let algorithm = match self.compression {
            Compression::None => CompressionAlgorithm::None,
            Compression::Brotli => CompressionAlgorithm::Brotli,
            Compression::Gzip => CompressionAlgorithm::Gzip,
            Compression::Zstd => CompressionAlgorithm::Zstd,
        };
        CompressionSettings {
            algorithm,
            quality: self.quality,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write the signature of a directory
    Sign {
        /// Directory to sign
        #[arg(long)]
        dir: PathBuf,
        /// Output path for the signature file
        #[arg(long, short)]
        output: PathBuf,
        #[command(flatten)]
        compression: CompressionArgs,
    },
    /// Create a patch from an old tree (or its signature) to a new tree
    Diff {
        /// Old directory, its signature file, or /dev/null
        #[arg(long)]
        old: PathBuf,
        /// New directory
        #[arg(long)]
        new: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
        /// Also write the new tree's signature here
        #[arg(long)]
        signature_output: Option<PathBuf>,
        #[command(flatten)]
        compression: CompressionArgs,
    },
    /// Apply a patch to an old tree
    Apply {
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
        /// Directory the patch was made against
        #[arg(long)]
        old: PathBuf,
        /// Where to build the new tree (defaults to updating --old in place)
        #[arg(long)]
        new: Option<PathBuf>,
        /// Scratch directory for staged files (defaults to a temporary directory)
        #[arg(long)]
        staging: Option<PathBuf>,
    },
    /// Check a directory against a signature
    Verify {
        /// Path to the signature file
        #[arg(long)]
        signature: PathBuf,
        /// Directory to check
        #[arg(long)]
        dir: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Sign {
            dir,
            output,
            compression,
        } => {
            println!("Signing {}...", dir.display());

            let start = Instant::now();
            let sign_dir = dir.clone();
            let signature = tokio::task::spawn_blocking(move || treepatch::sign(&sign_dir))
                .await?
                .with_context(|| format!("Failed to sign {}", dir.display()))?
                .with_compression(compression.settings());
            signature
                .write_to(&output)
                .with_context(|| format!("Failed to write signature: {}", output.display()))?;
            let elapsed = start.elapsed();

            println!("\nSignature written to {}", output.display());
            println!("  Directories: {}", signature.container.directories.len());
            println!("  Files: {}", signature.container.files.len());
            println!("  Symlinks: {}", signature.container.symlinks.len());
            println!("  Blocks: {}", signature.block_hashes.len());
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Diff {
            old,
            new,
            output,
            signature_output,
            compression,
        } => {
            println!("Creating patch...");
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let start = Instant::now();
            let target = treepatch::load_or_make_signature(&old)
                .with_context(|| format!("Failed to read old tree: {}", old.display()))?;
            let (mut patch, new_signature) = treepatch::diff(target, &new)
                .await
                .with_context(|| format!("Failed to diff {}", new.display()))?;

            patch.compression = compression.settings();
            patch
                .write_to(&output)
                .with_context(|| format!("Failed to write patch: {}", output.display()))?;
            if let Some(path) = &signature_output {
                new_signature
                    .with_compression(compression.settings())
                    .write_to(path)
                    .with_context(|| format!("Failed to write signature: {}", path.display()))?;
            }
            let elapsed = start.elapsed();

            let summary = patch.summary();
            println!("\nPatch created successfully!");
            println!("  Files: {}", summary.files);
            println!("  Block ranges: {}", summary.block_ranges);
            println!("  Blocks copied: {}", summary.copied_blocks);
            println!("  Literal bytes: {}", summary.literal_bytes);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Apply {
            patch,
            old,
            new,
            staging,
        } => {
            let new = new.unwrap_or_else(|| old.clone());
            println!("Applying patch...");
            println!("  Patch: {}", patch.display());
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());

            let start = Instant::now();
            let decoded = Patch::read_from(&patch)
                .with_context(|| format!("Failed to read patch: {}", patch.display()))?;
            let summary = tokio::task::spawn_blocking(move || {
                treepatch::apply(&decoded, &old, &new, staging.as_deref())
            })
            .await?
            .context("Failed to apply patch")?;
            let elapsed = start.elapsed();

            println!("\nPatch applied successfully!");
            println!("  Directories created: {}", summary.dirs_created);
            println!("  Files written: {}", summary.files_written);
            println!("  Symlinks created: {}", summary.symlinks_created);
            println!("  Files deleted: {}", summary.files_deleted);
            println!("  Directories deleted: {}", summary.dirs_deleted);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Verify { signature, dir } => {
            println!("Verifying {}...", dir.display());

            let decoded = Signature::read_from(&signature)
                .with_context(|| format!("Failed to read signature: {}", signature.display()))?;
            let check_dir = dir.clone();
            let (decoded, result) = tokio::task::spawn_blocking(move || {
                let result = treepatch::verify(&decoded, &check_dir);
                (decoded, result)
            })
            .await?;
            let result = result.with_context(|| format!("Failed to verify {}", dir.display()))?;

            if result.is_ok() {
                println!("\nVerified: no wounds.");
                return Ok(());
            }

            let container = &decoded.container;
            for wound in &result.wounds {
                match *wound {
                    Wound::Directory { index } => {
                        println!("  directory: {}", container.directories[index].name)
                    }
                    Wound::Symlink { index } => {
                        println!("  symlink: {}", container.symlinks[index].name)
                    }
                    Wound::File { index } => println!("  file: {}", container.files[index].name),
                }
            }
            bail!("{} wound(s) found in {}", result.wounds.len(), dir.display());
        }
    }

    Ok(())
}
