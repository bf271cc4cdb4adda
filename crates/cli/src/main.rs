use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use epub_reader_core::config::{
    config_path, library_options_from_config, load_config, write_config, AppConfig,
};
use epub_reader_core::ingest::{IngestReport, IngestSource};
use epub_reader_core::library::Library;
use epub_reader_core::progress::{ProgressEvent, ProgressHandler};
use indicatif::{ProgressBar, ProgressStyle};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "epub-reader")]
#[command(about = "Ingest EPUB archives into a library and read them chapter by chapter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Books directory (overrides config and BOOKS_DIR)
    #[arg(long, global = true)]
    books_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more EPUB files
    Ingest {
        /// Input file(s)
        #[arg(required = true)]
        input: Vec<String>,
    },

    /// List ingested books
    List,

    /// Print one chapter
    Chapter {
        /// Book identifier (see `list`)
        id: String,

        /// Zero-based chapter index
        index: String,

        /// Print the chapter HTML instead of a summary
        #[arg(long)]
        html: bool,
    },

    /// Copy a stored image out of a book
    Image {
        /// Book identifier
        id: String,

        /// Image file name
        name: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Delete a book from the library
    Delete {
        /// Book identifier
        id: String,
    },

    /// Show library and cache status
    Health,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Config { action } => run_config(action, cli.json),
        command => open_library(cli.books_dir.as_deref()).and_then(|library| match command {
            Commands::Ingest { input } => run_ingest(&library, input, cli.json),
            Commands::List => run_list(&library, cli.json),
            Commands::Chapter { id, index, html } => run_chapter(&library, id, index, *html, cli.json),
            Commands::Image { id, name, output } => run_image(&library, id, name, output, cli.json),
            Commands::Delete { id } => run_delete(&library, id, cli.json),
            Commands::Health => run_health(&library, cli.json),
            Commands::Config { action } => run_config(action, cli.json),
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_library(books_dir: Option<&Path>) -> Result<Library, Box<dyn std::error::Error + Send + Sync>> {
    let mut cfg = load_config();
    cfg.apply_env_overrides();
    if let Some(dir) = books_dir {
        cfg.library.books_dir = Some(dir.display().to_string());
    }
    tracing::debug!("Using books directory {}", cfg.books_dir().display());
    Ok(Library::open(library_options_from_config(&cfg))?)
}

/// Drives an indicatif bar from ingestion progress events.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(label: &str) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=> "));
        bar.set_prefix(label.to_string());
        Self { bar }
    }
}

impl ProgressHandler for BarProgress {
    fn on_progress(&self, event: ProgressEvent) {
        if let Some(total) = event.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(event.current);
        match event.message {
            Some(m) => self.bar.set_message(format!("{}: {}", event.stage, m)),
            None => self.bar.set_message(event.stage.as_str()),
        }
    }
}

fn run_ingest(library: &Library, inputs: &[String], json: bool) -> CliResult {
    let mut reports: Vec<IngestReport> = Vec::new();
    let mut failed = 0usize;

    for input in inputs {
        let path = Path::new(input);
        if !path.is_file() {
            eprintln!("Input file not found: {}", path.display());
            failed += 1;
            continue;
        }

        let result = if json {
            library.ingest(IngestSource::Path(path.to_path_buf()))
        } else {
            let progress = BarProgress::new(input);
            let result =
                library.ingest_with_progress(IngestSource::Path(path.to_path_buf()), Some(&progress));
            progress.bar.finish_and_clear();
            result
        };

        match result {
            Ok(report) => {
                if !json {
                    println!(
                        "Ingested: {} -> {} ({} chapters, {} images, toc from {:?})",
                        input, report.book_id, report.chapter_count, report.image_count, report.toc_source
                    );
                    for issue in &report.issues {
                        match &issue.location {
                            Some(loc) => println!("  [{}] {}: {}", issue.code, loc, issue.message),
                            None => println!("  [{}] {}", issue.code, issue.message),
                        }
                    }
                }
                reports.push(report);
            }
            Err(e) => {
                eprintln!("Failed: {}: {}", input, e);
                failed += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failed > 0 {
        return Err(format!("{} of {} input(s) failed", failed, inputs.len()).into());
    }
    Ok(())
}

fn run_list(library: &Library, json: bool) -> CliResult {
    let books = library.list_books()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&books)?);
    } else if books.is_empty() {
        println!("No books in {}", library.books_root().display());
    } else {
        for b in &books {
            println!("{}  {} by {} ({} chapters)", b.id, b.title, b.author, b.chapter_count);
        }
    }
    Ok(())
}

fn run_chapter(library: &Library, id: &str, index: &str, html: bool, json: bool) -> CliResult {
    let view = library.get_chapter(id, index)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else if html {
        println!("{}", view.html);
    } else {
        println!("Book: {}", view.book_title);
        println!("Chapter {}/{}: {}", view.index + 1, view.chapter_count, view.title);
        if !view.toc_path.is_empty() {
            println!("Location: {}", view.toc_path.join(" > "));
        }
        if let Some(p) = view.prev {
            println!("Previous: {}", p);
        }
        if let Some(n) = view.next {
            println!("Next: {}", n);
        }
    }
    Ok(())
}

fn run_image(library: &Library, id: &str, name: &str, output: &Path, json: bool) -> CliResult {
    let image = library.get_image(id, name)?;
    std::fs::write(output, &image.bytes)?;
    if json {
        let info = serde_json::json!({
            "output": output.display().to_string(),
            "mime_type": image.mime_type,
            "size": image.bytes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Wrote {} ({}, {} bytes)", output.display(), image.mime_type, image.bytes.len());
    }
    Ok(())
}

fn run_delete(library: &Library, id: &str, json: bool) -> CliResult {
    library.delete_book(id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted {}", id);
    }
    Ok(())
}

fn run_health(library: &Library, json: bool) -> CliResult {
    let health = library.health();
    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("Books root: {}", library.books_root().display());
        println!("Accessible: {}", health.books_root_accessible);
        println!("Cache: {}/{}", health.cache_entries, health.capacity);
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            write_config(&path, &AppConfig::default())?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let mut cfg = load_config();
            cfg.apply_env_overrides();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Path => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if json {
                println!("{}", serde_json::json!({ "path": path.display().to_string() }));
            } else {
                println!("{}", path.display());
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg = if path.exists() {
                epub_reader_core::config::load_config_from(&path)?
            } else {
                AppConfig::default()
            };
            set_config_key(&mut cfg, key, value)?;
            write_config(&path, &cfg)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> CliResult {
    fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Box<dyn std::error::Error + Send + Sync>> {
        value
            .trim()
            .parse()
            .map_err(|_| format!("{} expects a number, got {:?}", key, value).into())
    }

    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["library", "books_dir"] => cfg.library.books_dir = Some(value.to_string()),
        ["cache", "capacity"] => cfg.cache.capacity = num(key, value)?,
        ["limits", sub] => match *sub {
            "max_archive_mb" => cfg.limits.max_archive_mb = num(key, value)?,
            "max_toc_depth" => cfg.limits.max_toc_depth = num(key, value)?,
            "max_chapter_index" => cfg.limits.max_chapter_index = num(key, value)?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["security", sub] => match *sub {
            "max_compression_ratio" => cfg.security.max_compression_ratio = Some(num(key, value)?),
            "max_file_count" => cfg.security.max_file_count = Some(num(key, value)?),
            "max_resource_mb" => cfg.security.max_resource_mb = Some(num(key, value)?),
            "max_total_mb" => cfg.security.max_total_mb = Some(num(key, value)?),
            "max_nesting_depth" => cfg.security.max_nesting_depth = Some(num(key, value)?),
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}
