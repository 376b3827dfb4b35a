//! gallery-crawl — entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use gallery_crawl::{CrawlConfig, CrawlReport, Crawler};

#[derive(Parser)]
#[command(
    name = "gallery-crawl",
    about = "Download every image of a public profile gallery",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Account handle to crawl.
    handle: Option<String>,

    /// Directory in which instagram_<handle>/ is created.
    #[arg(long)]
    output_root: Option<String>,

    /// Maximum number of downloads in flight.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop after this many page requests.
    #[arg(long)]
    max_pages: Option<usize>,

    /// Gallery base URL.
    #[arg(long, hide = true)]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the crawl report as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   gallery-crawl completions bash > ~/.local/share/bash-completion/completions/gallery-crawl
    ///   gallery-crawl completions zsh > ~/.zfunc/_gallery-crawl
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(Commands::Completions { shell }) = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "gallery-crawl", &mut std::io::stdout());
        return Ok(());
    }

    let Some(handle) = cli.handle.as_deref().map(str::trim).filter(|h| !h.is_empty()) else {
        eprintln!("Missing account name argument");
        std::process::exit(1);
    };

    let mut config = CrawlConfig::from_env().with_max_pages(cli.max_pages);
    if let Some(root) = &cli.output_root {
        config = config.with_output_root(root);
    }
    if let Some(n) = cli.concurrency {
        config = config.with_concurrency(n);
    }
    if let Some(base) = &cli.base_url {
        config = config.with_base_url(base);
    }

    let crawler = match Crawler::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match crawler.crawl(handle).await {
        Ok(report) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &crawler);
            }
        }
        Err(e) => {
            eprintln!("Crawl failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_report(report: &CrawlReport, crawler: &Crawler) {
    println!("Crawled: {}", report.handle);
    if let Some(id) = &report.user_id {
        println!("  User id: {id}");
    }
    println!(
        "  Output: {}",
        crawler.config().output_dir(&report.handle).display()
    );
    println!("  Pages: {}", report.pages_fetched);
    println!(
        "  Images: {} attempted, {} written, {} duplicate",
        report.downloads_attempted, report.files_written, report.duplicates
    );
    println!("  Videos skipped: {}", report.videos_skipped);
    if report.transport_errors > 0 || report.ignored_responses > 0 {
        println!(
            "  Failed requests: {}, ignored responses: {}",
            report.transport_errors, report.ignored_responses
        );
    }
}
