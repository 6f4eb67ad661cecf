use clap::Parser;
use novel_scraper_lib::{logger, JobManager, JobStatus, ProviderRegistry, SearchAggregator, SearchStatus, Settings};

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use log::{error, info, warn};

const POLL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "novel-scraper")]
#[command(about = "Download web novels chapter by chapter, or search for them across sources")]
#[command(version, arg_required_else_help = true)]
struct Cli {
    /// Book listing URLs to download, one merged file each
    #[arg(value_name = "URL", required_unless_present = "search")]
    urls: Vec<String>,

    /// Search all sources and print ranked results instead of downloading
    #[arg(long, value_name = "KEYWORD", conflicts_with = "urls")]
    search: Option<String>,

    /// Where merged files and per-chapter artifacts are written
    #[arg(long, env = "NOVEL_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(dir) = cli.download_dir {
        settings.download_dir = dir;
    }

    match cli.search {
        Some(keyword) => search(settings, &keyword),
        None => download_all(settings, &cli.urls),
    }
}

fn download_all(settings: Settings, urls: &[String]) -> Result<(), Box<dyn Error>> {
    info!("Starting Novel Scraper, saving to {}", settings.download_dir.display());
    let manager = JobManager::new(settings, ProviderRegistry::with_defaults());

    let mut failed_books = 0;
    for (i, url) in urls.iter().enumerate() {
        info!("Processing {} / {} : {}", i + 1, urls.len(), url);
        let job_id = manager.start_job(url)?;

        let job = loop {
            let Some(job) = manager.wait_for_terminal(&job_id, POLL) else {
                return Err(format!("job {} vanished", job_id).into());
            };
            if !job.status.is_live() {
                break job;
            }
            info!("{}% ({}/{}) {}", job.percent, job.processed_count, job.total, job.last_status_text);
        };

        match job.status {
            JobStatus::Done => {
                let output = job
                    .output_name
                    .as_deref()
                    .and_then(|name| manager.artifact_path(name));
                match output {
                    Some(path) => println!("{}", path.display()),
                    None => warn!("No merged file was produced for {}", url),
                }
                if job.fail_count > 0 {
                    warn!("{} chapters failed for {}", job.fail_count, url);
                }
            }
            _ => {
                failed_books += 1;
                error!("{}: {}", url, job.last_status_text);
            }
        }
    }

    info!("Finished. {} of {} books downloaded.", urls.len() - failed_books, urls.len());
    Ok(())
}

fn search(settings: Settings, keyword: &str) -> Result<(), Box<dyn Error>> {
    let deadline = settings.search_deadline;
    let aggregator = SearchAggregator::with_defaults(settings);
    let id = aggregator.start_search(keyword)?;

    let Some(job) = aggregator.wait_for_done(&id, deadline + POLL) else {
        return Err("search job vanished".into());
    };
    if job.status != SearchStatus::Done {
        warn!("Search did not finish in time, showing partial results");
    }

    for r in &job.results {
        let state = if r.is_completed { "completed" } else { "ongoing" };
        println!("{}\t{}\t{}\t{}\t{}\t{}", r.title, r.author, state, r.estimated_item_count, r.provider, r.url);
    }
    if job.results.is_empty() {
        println!("No results for {}", keyword);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_takes_many_urls() {
        let cli = Cli::try_parse_from(["novel-scraper", "https://a.test/1/", "https://b.test/2/"]).unwrap();
        assert_eq!(cli.urls, vec!["https://a.test/1/", "https://b.test/2/"]);
        assert!(cli.search.is_none());
    }

    #[test]
    fn test_cli_search_keeps_keyword_whole() {
        let cli = Cli::try_parse_from(["novel-scraper", "--search", "斗破 苍穹"]).unwrap();
        assert_eq!(cli.search.as_deref(), Some("斗破 苍穹"));
        assert!(cli.urls.is_empty());
    }

    #[test]
    fn test_cli_rejects_search_with_urls() {
        assert!(Cli::try_parse_from(["novel-scraper", "--search", "book", "https://a.test/"]).is_err());
    }

    #[test]
    fn test_cli_download_dir_flag() {
        let cli = Cli::try_parse_from(["novel-scraper", "--download-dir", "/tmp/books", "https://a.test/"]).unwrap();
        assert_eq!(cli.download_dir, Some(PathBuf::from("/tmp/books")));
    }

    #[test]
    fn test_cli_requires_something_to_do() {
        assert!(Cli::try_parse_from(["novel-scraper"]).is_err());
    }
}
