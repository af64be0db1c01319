use anyhow::Result;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use rusqlite::Connection;
use tracing::info;

use crate::config::PartitionSettings;
use crate::db::{self, Partition};
use crate::pacing::{RunLoop, RunPolicy, RunSummary};

use super::progress_bar;

pub struct PartitionReport {
    pub summary: RunSummary,
    pub train: usize,
    pub eval: usize,
}

/// Assigns a weighted T/E split to every extracted item without one.
pub fn run<R: Rng + ?Sized>(
    conn: &Connection,
    settings: &PartitionSettings,
    rng: &mut R,
) -> Result<PartitionReport> {
    let labels = [Partition::Train, Partition::Eval];
    let dist = WeightedIndex::new([settings.train_weight, settings.eval_weight])?;

    let ids = db::fetch_unpartitioned(conn)?;
    info!("{} items to partition", ids.len());

    let pb = progress_bar(ids.len())?;
    let mut run = RunLoop::new("partition", RunPolicy::unpaced());
    let (mut train, mut eval) = (0, 0);
    for id in ids {
        let partition = labels[dist.sample(rng)];
        db::set_partition(conn, id, partition)?;
        match partition {
            Partition::Train => train += 1,
            Partition::Eval => eval += 1,
        }
        run.record_success();
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Assigned {} to training, {} to evaluation", train, eval);
    Ok(PartitionReport {
        summary: run.finish(),
        train,
        eval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn extracted(conn: &Connection, n: usize) {
        let tx = conn.unchecked_transaction().unwrap();
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO links (href, magnet_link, torrent_hash, torrent_file, file_names)
                     VALUES (?1, 'magnet:?', 'H', 'H.torrent', '')",
                )
                .unwrap();
            for i in 0..n {
                stmt.execute([format!("/t/{}", i)]).unwrap();
            }
        }
        tx.commit().unwrap();
    }

    #[test]
    fn default_weights_split_evenly() {
        let conn = test_conn();
        extracted(&conn, 10_000);
        let mut rng = StdRng::seed_from_u64(42);

        let report = run(&conn, &PartitionSettings::default(), &mut rng).unwrap();

        assert_eq!(report.train + report.eval, 10_000);
        let fraction = report.train as f64 / 10_000.0;
        assert!((0.47..0.53).contains(&fraction), "train fraction {}", fraction);
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.train, report.train);
        assert_eq!(stats.eval, report.eval);
        assert!(db::fetch_unpartitioned(&conn).unwrap().is_empty());
    }

    #[test]
    fn zero_weight_label_is_never_drawn() {
        let conn = test_conn();
        extracted(&conn, 50);
        let settings = PartitionSettings {
            train_weight: 1.0,
            eval_weight: 0.0,
        };

        let report = run(&conn, &settings, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!((report.train, report.eval), (50, 0));
        assert_eq!(report.summary.succeeded, 50);
    }

    #[test]
    fn rerun_leaves_assigned_items_alone() {
        let conn = test_conn();
        extracted(&conn, 5);
        let mut rng = StdRng::seed_from_u64(3);
        run(&conn, &PartitionSettings::default(), &mut rng).unwrap();

        let report = run(&conn, &PartitionSettings::default(), &mut rng).unwrap();
        assert_eq!(report.summary.processed, 0);
    }
}
