use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::config::DiscoverSettings;
use crate::db;
use crate::errors::StageError;
use crate::fetch::Fetch;
use crate::pacing::{RunLoop, RunSummary, StopReason};
use crate::parser::listing::{parse_listing, ListingPage};
use crate::parser::locator::next_page_url;

pub struct DiscoverReport {
    pub summary: RunSummary,
    /// New handles only; duplicates of earlier runs are not counted.
    pub added: usize,
}

/// Walks listing pages from `start_url`, inserting every qualifying handle.
///
/// The trailing number of the url is the page counter. A url without one is
/// a single page and is fetched once.
pub async fn run<F: Fetch>(
    conn: &Connection,
    fetcher: &F,
    start_url: &str,
    settings: &DiscoverSettings,
) -> Result<DiscoverReport> {
    let mut run = RunLoop::new("discover", settings.policy());
    let mut url = start_url.to_string();
    let mut added = 0;

    loop {
        info!("Processing url {}", url);
        match fetch_listing(fetcher, &url, settings.min_seeds).await {
            Ok(ListingPage::Empty(notice)) => {
                info!("Listing ended on {}: {}", url, notice);
                run.stop(StopReason::EndOfListing);
                break;
            }
            Ok(ListingPage::Rows(handles)) => {
                let inserted = db::insert_handles(conn, &handles)?;
                info!("Found {} handles, {} new", handles.len(), inserted);
                added += inserted;
                run.record_success();
            }
            Err(e) => run.record_failure(format!("Page {}", url), e),
        }

        if run.check_stop().is_some() {
            break;
        }
        let Some((next, current)) = next_page_url(&url) else {
            break;
        };
        info!("Finished page {}", current);
        url = next;
        run.pause().await;
    }

    let summary = run.finish();
    info!("{} handles added", added);
    Ok(DiscoverReport { summary, added })
}

async fn fetch_listing<F: Fetch>(
    fetcher: &F,
    url: &str,
    min_seeds: u32,
) -> Result<ListingPage, StageError> {
    let response = fetcher.fetch(url).await?;
    if !response.is_success() {
        return Err(StageError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    match parse_listing(&response.text(), min_seeds) {
        ListingPage::Rows(handles) if handles.is_empty() => {
            Err(StageError::NoListings(url.to_string()))
        }
        page => Ok(page),
    }
}
