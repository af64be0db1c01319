use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rusqlite::Connection;
use tracing::info;

use crate::config::RetrieveSettings;
use crate::db;
use crate::errors::StageError;
use crate::fetch::{join_url, Fetch};
use crate::pacing::{RunLoop, RunSummary};
use crate::parser::locator::extract_content_hash;

/// Downloads `<HASH>.torrent` from the cache origin for every resolved item.
/// `fetcher` should carry the retrieval timeout, not the page timeout.
pub async fn run<F: Fetch>(
    conn: &Connection,
    fetcher: &F,
    cache_origin: &str,
    artifact_dir: &Path,
    settings: &RetrieveSettings,
    limit: Option<usize>,
) -> Result<RunSummary> {
    tokio::fs::create_dir_all(artifact_dir)
        .await
        .with_context(|| format!("Failed to create artifact directory {:?}", artifact_dir))?;

    let mut items = db::fetch_unretrieved(conn)?;
    if settings.shuffle {
        items.shuffle(&mut rand::rng());
    }
    let total = limit.map_or(items.len(), |n| n.min(items.len()));
    info!("{} locators to retrieve", total);

    let guess = Duration::from_secs_f64(settings.pause_secs + 2.0);
    let mut run = RunLoop::new("retrieve", settings.policy(limit));
    for (i, (id, locator)) in items.iter().enumerate() {
        match retrieve_one(fetcher, cache_origin, artifact_dir, locator).await {
            Ok((hash, file_name)) => {
                info!("Stored {} for item {}", file_name, id);
                db::set_artifact(conn, *id, &hash, &file_name)?;
                run.record_success();
            }
            Err(e) => run.record_failure(format!("Item {}", id), e),
        }
        run.log_progress(total, guess);

        if run.check_stop().is_some() {
            break;
        }
        if i + 1 < items.len() {
            run.pause().await;
        }
    }
    Ok(run.finish())
}

/// Returns (hash, file name) once the artifact is on disk.
async fn retrieve_one<F: Fetch>(
    fetcher: &F,
    cache_origin: &str,
    artifact_dir: &Path,
    locator: &str,
) -> Result<(String, String), StageError> {
    let hash = extract_content_hash(locator)
        .ok_or_else(|| StageError::HashNotFound(locator.to_string()))?;
    let file_name = format!("{}.torrent", hash);
    let path = artifact_dir.join(&file_name);

    if tokio::fs::try_exists(&path).await? {
        info!("{} already exists, downloading again", file_name);
        tokio::fs::remove_file(&path).await?;
    }

    let url = join_url(cache_origin, &file_name)?;
    info!("Downloading: {}", url);
    let download_error = |reason: String| StageError::Download {
        url: url.clone(),
        reason,
    };
    let response = fetcher
        .fetch(&url)
        .await
        .map_err(|e| download_error(e.to_string()))?;
    if !response.is_success() {
        return Err(download_error(format!("status code {}", response.status)));
    }

    tokio::fs::write(&path, &response.body).await?;
    if !tokio::fs::try_exists(&path).await? {
        return Err(download_error("file missing after write".into()));
    }
    Ok((hash, file_name))
}
