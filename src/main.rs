use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use reprise::cli::{self, Command};
use reprise::config::{self, Config};
use reprise::media::catalog;
use reprise::media::decoder::FfmpegDecoderFactory;
use reprise::media::library::VideoIdentity;
use reprise::media::metadata::{format_duration, MetadataExtractor};
use reprise::media::source::FsMediaSource;
use reprise::store::PositionStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let file_config = config::find_config_file(args.config.as_deref())
        .and_then(|path| {
            match config::load_config(&path) {
                Ok(cfg) => {
                    tracing::debug!("Loaded config from {}", path.display());
                    Some(cfg)
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    None
                }
            }
        });

    let config = Config::resolve(file_config, &args);

    let Some(store_path) = config.store_path.clone() else {
        eprintln!("error: no data directory on this platform -- pass --store FILE");
        std::process::exit(1);
    };
    let store = PositionStore::open(&store_path).unwrap_or_else(|e| {
        eprintln!("error: cannot open position file {}: {}", store_path.display(), e);
        std::process::exit(1);
    });

    match args.command {
        Command::List { roots, thumbnails } => {
            list(&config, &store, roots, thumbnails.as_deref()).await;
        }
        Command::Position { file } => {
            let identity = identity_for(&file);
            println!("{}", store.get(identity.key()));
        }
        Command::Forget { file } => {
            let identity = identity_for(&file);
            if !store.clear(identity.key()) {
                eprintln!("error: could not update {}", store_path.display());
                std::process::exit(1);
            }
        }
    }
}

async fn list(config: &Config, store: &PositionStore, roots: Vec<PathBuf>, thumbnails: Option<&Path>) {
    tracing::info!("Cataloging videos under {:?} in:", config.directory_filter);
    for root in &roots {
        tracing::info!("  {}", root.display());
    }

    // Synchronous walk -- nothing else is running yet
    let source = FsMediaSource::new(roots);
    let entries = catalog::entries(&source, &config.catalog_options());
    if entries.is_empty() {
        eprintln!("no videos found");
        return;
    }

    let factory = Arc::new(FfmpegDecoderFactory::new(&config.ffmpeg));
    let extractor = MetadataExtractor::new(factory, config.extractor_options());
    extractor.enrich_all(&entries).await;

    if let Some(dir) = thumbnails {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("Cannot create thumbnail directory {}: {}", dir.display(), e);
        }
    }

    for (n, entry) in entries.iter().enumerate() {
        let identity = entry.identity();
        let saved = store.get(identity.key());
        let resume = if saved == 0 { "-".to_string() } else { format_duration(saved) };
        println!("{:<48} {:>8} {:>8}", identity.name(), entry.duration(), resume);

        if let (Some(dir), Some(thumbnail)) = (thumbnails, entry.thumbnail()) {
            let path = dir.join(format!("{}.png", n + 1));
            if let Err(e) = thumbnail.save(&path) {
                tracing::warn!("Cannot write thumbnail {}: {}", path.display(), e);
            }
        }
    }
}

/// Identity for a file named on the command line. Files that no longer exist
/// still map to their absolute path so their positions can be forgotten.
fn identity_for(file: &Path) -> VideoIdentity {
    let path = std::fs::canonicalize(file)
        .or_else(|_| std::path::absolute(file))
        .unwrap_or_else(|_| file.to_path_buf());
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    VideoIdentity::from_path(&path, name).unwrap_or_else(|| {
        eprintln!("error: cannot build a file URL for {}", file.display());
        std::process::exit(1);
    })
}
