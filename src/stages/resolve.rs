use std::time::Duration;

use anyhow::Result;
use rand::seq::SliceRandom;
use rusqlite::Connection;
use tracing::info;

use crate::config::ResolveSettings;
use crate::db;
use crate::errors::StageError;
use crate::fetch::{join_url, Fetch};
use crate::pacing::{RunLoop, RunSummary};
use crate::parser::locator::find_magnet_link;

/// Fetches each unresolved handle's detail page and stores its magnet link.
pub async fn run<F: Fetch>(
    conn: &Connection,
    fetcher: &F,
    base: &str,
    settings: &ResolveSettings,
    limit: Option<usize>,
) -> Result<RunSummary> {
    let mut items = db::fetch_unresolved(conn)?;
    if settings.shuffle {
        items.shuffle(&mut rand::rng());
    }
    let total = limit.map_or(items.len(), |n| n.min(items.len()));
    info!("{} handles to resolve", total);

    let guess = Duration::from_secs_f64(settings.pause_secs + 1.0);
    let mut run = RunLoop::new("resolve", settings.policy(limit));
    for (i, (id, handle)) in items.iter().enumerate() {
        match resolve_one(fetcher, base, handle).await {
            Ok(locator) => {
                db::set_resolved_locator(conn, *id, &locator)?;
                run.record_success();
            }
            Err(e) => run.record_failure(format!("Handle {}", handle), e),
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

async fn resolve_one<F: Fetch>(fetcher: &F, base: &str, handle: &str) -> Result<String, StageError> {
    let url = join_url(base, handle)?;
    let response = fetcher.fetch(&url).await?;
    if !response.is_success() {
        return Err(StageError::HttpStatus {
            url,
            status: response.status,
        });
    }
    find_magnet_link(&response.text())
        .map(str::to_string)
        .ok_or(StageError::LocatorNotFound(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;
    use crate::fetch::mock::ScriptedFetcher;
    use crate::pacing::StopReason;

    const BASE: &str = "https://i.example";

    fn settings() -> ResolveSettings {
        ResolveSettings {
            shuffle: false,
            pause_secs: 0.0,
            jitter_secs: 0.0,
            ..ResolveSettings::default()
        }
    }

    fn seed(conn: &Connection, n: usize) {
        let handles: Vec<String> = (1..=n).map(|i| format!("/torrent/{}/x/", i)).collect();
        db::insert_handles(conn, &handles).unwrap();
    }

    #[tokio::test]
    async fn stores_magnet_and_skips_failures() {
        let conn = test_conn();
        seed(&conn, 3);
        let fetcher = ScriptedFetcher::new()
            .ok(200, r#"<a href="magnet:?xt=urn:btih:AAAA&dn=one">get</a>"#)
            .ok(404, "gone")
            .ok(200, "<p>no magnet here</p>");

        let summary = run(&conn, &fetcher, BASE, &settings(), None).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.stop, None);
        assert_eq!(fetcher.requested.borrow()[0], "https://i.example/torrent/1/x/");
        assert!(summary.failure_messages[1].contains("magnet link not found"));

        let unresolved = db::fetch_unresolved(&conn).unwrap();
        assert_eq!(unresolved.len(), 2);
        assert_eq!(
            db::fetch_unretrieved(&conn).unwrap()[0].1,
            "magnet:?xt=urn:btih:AAAA&dn=one"
        );
    }

    #[tokio::test]
    async fn failure_budget_stops_after_exactly_three_attempts() {
        let conn = test_conn();
        seed(&conn, 6);
        let fetcher = ScriptedFetcher::new()
            .fail("timeout")
            .fail("timeout")
            .fail("timeout")
            .fail("timeout");

        let summary = run(&conn, &fetcher, BASE, &settings(), None).await.unwrap();

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.stop, Some(StopReason::FailureBudget));
        assert_eq!(db::fetch_unresolved(&conn).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn limit_caps_attempts() {
        let conn = test_conn();
        seed(&conn, 4);
        let fetcher = ScriptedFetcher::new()
            .ok(200, r#""magnet:?xt=urn:btih:A""#)
            .ok(200, r#""magnet:?xt=urn:btih:B""#);

        let summary = run(&conn, &fetcher, BASE, &settings(), Some(2)).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(summary.stop, Some(StopReason::ItemLimit));
        assert_eq!(db::fetch_unresolved(&conn).unwrap().len(), 2);
    }
}
