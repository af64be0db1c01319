use anyhow::{anyhow, Result};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use rusqlite::Connection;
use tracing::info;

use crate::config::NormalizeSettings;
use crate::db::{self, Partition};
use crate::pacing::{RunLoop, RunPolicy, RunSummary};
use crate::parser::filename::normalize;
use crate::utils::{base_name, is_printable_ascii, strip_extension};

use super::progress_bar;

pub struct NormalizeReport {
    pub summary: RunSummary,
    /// Normalized names produced, duplicates included.
    pub produced: usize,
    /// Rows actually added to the label queue.
    pub inserted: usize,
}

/// Turns the member paths of one partition into normalized, de-duplicated text items.
pub fn run<R: Rng + ?Sized>(
    conn: &Connection,
    settings: &NormalizeSettings,
    rng: &mut R,
) -> Result<NormalizeReport> {
    let partition = Partition::from_code(settings.group)
        .ok_or_else(|| anyhow!("unknown partition code {}", settings.group))?;
    let mut rows = db::fetch_member_paths(conn, partition)?;
    if settings.shuffle {
        rows.shuffle(rng);
    }
    info!("Partition {}: {} items", settings.group, rows.len());

    let pb = progress_bar(rows.len())?;
    let mut run = RunLoop::new("normalize", RunPolicy::unpaced());
    let mut combined = Vec::new();
    for (_, paths) in &rows {
        combined.extend(
            candidate_names(paths, settings, rng)
                .into_iter()
                .map(normalize)
                .filter(|name| !name.is_empty()),
        );
        run.record_success();
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Writing {} names to the label queue", combined.len());
    let inserted = db::insert_text_items(conn, &combined)?;
    info!("{} new text items", inserted);
    Ok(NormalizeReport {
        summary: run.finish(),
        produced: combined.len(),
        inserted,
    })
}

/// Base names without extension that pass the length, charset and sample
/// filters, randomly capped at `max_names_per_item`.
fn candidate_names<'a, R: Rng + ?Sized>(
    member_paths: &'a str,
    settings: &NormalizeSettings,
    rng: &mut R,
) -> Vec<&'a str> {
    let names: Vec<&str> = member_paths
        .split('\n')
        .map(|path| strip_extension(base_name(path)).trim())
        .filter(|name| name.chars().count() >= settings.min_name_len)
        .filter(|name| !settings.ascii_only || is_printable_ascii(name))
        .filter(|name| !settings.skip_samples || !is_sample(name))
        .collect();
    if names.len() > settings.max_names_per_item {
        names
            .choose_multiple(rng, settings.max_names_per_item)
            .copied()
            .collect()
    } else {
        names
    }
}

/// Preview clips: `sample` as the whole name or as its first or last token.
fn is_sample(name: &str) -> bool {
    let mut tokens = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty());
    let first = tokens.next();
    let last = tokens.last().or(first);
    [first, last]
        .into_iter()
        .flatten()
        .any(|t| t.eq_ignore_ascii_case("sample"))
}
