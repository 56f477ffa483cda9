use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventface_backend::HttpFaceSearch;
use eventface_core::aggregator::clamp_limit;
use eventface_core::{
    ArchiveResolver, MatchAggregator, OutputMaterializer, PathError, PathGuard, PersonSearch,
    ReferenceCollector, SearchError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod report;

use config::Config;

#[derive(Parser)]
#[command(name = "eventface", about = "Find a person across event photos")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search event photos with one image, or with a folder of reference images of one person
    Search {
        /// Reference image file, or a person folder (e.g. refs/Jane_Doe) of reference images
        path: PathBuf,
        /// Max results per reference image
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Folder mode: list matches without copying them
        #[arg(long)]
        no_copy: bool,
        /// Folder mode: output root (defaults to person_search.output_root)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Event photos directory for resolving matched photos (defaults to storage.event_photos)
        #[arg(long)]
        photos_base: Option<PathBuf>,
        /// Open the output folder (folder mode) or matched images (file mode)
        #[arg(short, long)]
        open: bool,
        /// Print the result as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Index event photos in the search backend
    Register {
        /// Event photos directory (defaults to storage.event_photos)
        #[arg(long)]
        photos: Option<PathBuf>,
    },
    /// Remove every registered photo from the search backend
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the effective configuration
    Config,
    /// Check that the search backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = config::config_path(cli.config);
    let config = config::load_config(&config_path)?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    match cli.command {
        Commands::Search {
            path,
            limit,
            no_copy,
            output,
            photos_base,
            open,
            json,
        } => {
            let guard = PathGuard::new(config.storage.allowed_directories.clone());
            let target = search_target(&guard, &path)?;
            let resolver = config.archive_resolver(photos_base.as_deref());
            let backend = Arc::new(HttpFaceSearch::new(&config.backend_config())?);
            match target {
                SearchTarget::Folder => {
                    let output_root =
                        output.unwrap_or_else(|| config.person_search.output_root.clone());
                    let opts = FolderOptions {
                        limit,
                        copy: !no_copy,
                        output_root,
                        open,
                        json,
                    };
                    search_folder(&config, guard, backend, resolver, &path, opts).await?;
                }
                SearchTarget::File(image) => {
                    search_file(&backend, &resolver, &image, limit, open, json).await?;
                }
            }
        }
        Commands::Register { photos } => {
            let target = match photos {
                Some(dir) => PathGuard::new(config.storage.allowed_directories.clone())
                    .validate(&dir)
                    .context("Access to directory not allowed")?,
                None => config.storage.event_photos.clone(),
            };
            println!("Registering photos from: {}", target.display());
            let backend = HttpFaceSearch::new(&config.backend_config())?;
            let count = backend.register(Some(target.as_path())).await?;
            println!("Registered {count} photos.");
        }
        Commands::Clear { yes } => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Delete all registered face embeddings?")
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
            let backend = HttpFaceSearch::new(&config.backend_config())?;
            let count = backend.clear().await?;
            println!("Cleared {count} registered images from database.");
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Health => {
            let backend = HttpFaceSearch::new(&config.backend_config())?;
            match backend.health().await {
                Ok(true) => println!("backend: ok ({})", config.backend.url),
                Ok(false) => println!("backend: degraded ({})", config.backend.url),
                Err(e) => println!("backend: unreachable ({}): {e}", config.backend.url),
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum SearchTarget {
    Folder,
    File(PathBuf),
}

/// Decide between person-folder and single-image search.
///
/// The guard sees the path first. A single image outside the allowed roots is
/// still accepted, since it is only read, never listed.
fn search_target(guard: &PathGuard, path: &Path) -> Result<SearchTarget> {
    match guard.validate(path) {
        Ok(_) => Ok(SearchTarget::Folder),
        Err(PathError::NotADirectory(file)) => Ok(SearchTarget::File(file)),
        Err(_) if path.is_file() => Ok(SearchTarget::File(path.to_path_buf())),
        Err(e) => Err(e).context("Invalid person folder"),
    }
}

struct FolderOptions {
    limit: usize,
    copy: bool,
    output_root: PathBuf,
    open: bool,
    json: bool,
}

async fn search_folder(
    config: &Config,
    guard: PathGuard,
    backend: Arc<HttpFaceSearch>,
    resolver: ArchiveResolver,
    folder: &Path,
    opts: FolderOptions,
) -> Result<()> {
    let search = PersonSearch::new(
        guard,
        ReferenceCollector::new(&config.files.allowed_formats),
        MatchAggregator::new(backend, config.aggregator_options()),
        config.person_search.max_reference_images,
    );

    let result = search.search_folder(folder, opts.limit).await?;

    let summary = if opts.copy && !result.matches.is_empty() {
        let materializer = OutputMaterializer::new(resolver);
        Some(materializer.materialize(&result, &opts.output_root)?)
    } else {
        None
    };

    if opts.json {
        let body = serde_json::json!({ "result": &result, "output": &summary });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print!("{}", report::render_person_result(&result));
        if let Some(summary) = &summary {
            print!("\n{}", report::render_output_summary(summary));
        }
        let skipped = summary
            .as_ref()
            .map(|s| s.skipped_files.as_slice())
            .unwrap_or_default();
        if let Some(warnings) = report::render_warnings(&result.search_errors, skipped) {
            print!("{warnings}");
        }
    }

    if opts.open {
        if let Some(summary) = &summary {
            open_path(&summary.output_path);
        }
    }
    Ok(())
}

async fn search_file(
    backend: &HttpFaceSearch,
    resolver: &ArchiveResolver,
    image: &Path,
    limit: usize,
    open: bool,
    json: bool,
) -> Result<()> {
    use eventface_core::FaceSearch;

    let content = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image: {}", image.display()))?;

    let matches = match backend.search(&content, clamp_limit(limit)).await {
        Ok(matches) => matches,
        Err(e @ (SearchError::NoFaceDetected | SearchError::MultipleFacesDetected(_))) => {
            eprintln!("Error: {e}");
            return Ok(());
        }
        Err(e) => return Err(e).context("Search failed"),
    };
    tracing::info!(matches = matches.len(), "single image search complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
    } else {
        print!("{}", report::render_single_matches(&matches, resolver));
    }

    if open {
        for m in &matches {
            let full_path = resolver.resolve(&m.identity);
            if full_path.exists() {
                open_path(&full_path);
            }
        }
    }
    Ok(())
}

/// Hand a path to the desktop's default opener. Failures are logged, not fatal.
fn open_path(path: &Path) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = command.arg(path).status() {
        tracing::warn!(path = %path.display(), error = %e, "failed to open");
    }
}
