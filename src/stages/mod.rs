//! One runner per pipeline stage. Every runner selects its unfinished rows,
//! performs one transition per row, and commits each row on its own, so a
//! killed run resumes where it stopped.

pub mod annotate;
pub mod discover;
pub mod extract;
pub mod normalize;
pub mod partition;
pub mod resolve;
pub mod retrieve;

use indicatif::{ProgressBar, ProgressStyle};

/// Bar for the local (unpaced) loops.
pub(crate) fn progress_bar(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}
