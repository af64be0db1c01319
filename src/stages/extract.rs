use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::ExtractSettings;
use crate::db;
use crate::errors::StageError;
use crate::pacing::{RunLoop, RunSummary};
use crate::parser::artifact::{filter_by_extension, ArtifactDecoder};

use super::progress_bar;

/// Decodes every retrieved, unextracted artifact and stores its video member paths.
pub fn run<D: ArtifactDecoder>(
    conn: &Connection,
    decoder: &D,
    artifact_dir: &Path,
    settings: &ExtractSettings,
) -> Result<RunSummary> {
    let items = db::fetch_unextracted(conn)?;
    info!("{} artifacts to extract", items.len());
    extract_all(conn, decoder, artifact_dir, settings, "extract", &items)
}

/// Re-extracts every artifact file on disk that belongs to a known item.
/// Used after the extension allow-list changes.
pub fn rescan<D: ArtifactDecoder>(
    conn: &Connection,
    decoder: &D,
    artifact_dir: &Path,
    settings: &ExtractSettings,
) -> Result<RunSummary> {
    let mut names: Vec<String> = std::fs::read_dir(artifact_dir)
        .with_context(|| format!("Failed to read artifact directory {:?}", artifact_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut items = Vec::with_capacity(names.len());
    for name in names {
        match db::find_id_by_artifact_ref(conn, &name)? {
            Some(id) => items.push((id, name)),
            None => warn!("{} has no matching item, skipping", name),
        }
    }
    info!("{} artifacts to re-extract", items.len());
    extract_all(conn, decoder, artifact_dir, settings, "rescan", &items)
}

fn extract_all<D: ArtifactDecoder>(
    conn: &Connection,
    decoder: &D,
    artifact_dir: &Path,
    settings: &ExtractSettings,
    stage: &'static str,
    items: &[(i64, String)],
) -> Result<RunSummary> {
    let pb = progress_bar(items.len())?;
    let mut run = RunLoop::new(stage, settings.policy());
    for (id, file_name) in items {
        match extract_one(decoder, &artifact_dir.join(file_name), &settings.extensions) {
            Ok(paths) => {
                db::set_member_paths(conn, *id, &paths)?;
                run.record_success();
            }
            Err(e) => pb.suspend(|| run.record_failure(format!("Artifact {}", file_name), e)),
        }
        pb.inc(1);
        if run.check_stop().is_some() {
            break;
        }
    }
    pb.finish_and_clear();
    Ok(run.finish())
}

fn extract_one<D: ArtifactDecoder>(
    decoder: &D,
    path: &Path,
    extensions: &[String],
) -> Result<Vec<String>, StageError> {
    let bytes = std::fs::read(path)?;
    let decoded = decoder.decode(&bytes).map_err(|source| StageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(filter_by_extension(decoded.paths(), extensions))
}
