//! Properties of generated sequences
//!
//! A generated sequence must never reference a resource that is not open
//! at that point, never invalidate a batch (commit, range deletion, time
//! range clearing, a new iterator) while iterators on it are open, and
//! never commit a transaction while a batch still holds its writes. These checks
//! replay the command list symbolically, without an engine.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use strata_metamorphic::{Generators, OpRun, SequenceGenerator};

/// Symbolic model of open resources
#[derive(Default)]
struct Liveness {
    restarts: bool,
    txns: BTreeSet<String>,
    batches: BTreeSet<String>,
    // iterator -> read/writer it was opened on
    iters: BTreeMap<String, String>,
    // txn -> batches holding its unflushed writes
    txn_batches: BTreeMap<String, BTreeSet<String>>,
}

impl Liveness {
    fn check_reader(&self, rw: &str) -> Result<(), String> {
        if rw == "engine" || self.batches.contains(rw) {
            Ok(())
        } else {
            Err(format!("batch {} is not open", rw))
        }
    }

    fn check_txn(&self, txn: &str) -> Result<(), String> {
        if self.txns.contains(txn) {
            Ok(())
        } else {
            Err(format!("transaction {} is not open", txn))
        }
    }

    fn check_iter(&self, iter: &str) -> Result<(), String> {
        if self.iters.contains_key(iter) {
            Ok(())
        } else {
            Err(format!("iterator {} is not open", iter))
        }
    }

    fn check_no_iters_on(&self, rw: &str, op: &str) -> Result<(), String> {
        if rw == "engine" {
            return Ok(());
        }
        let open: Vec<&String> = self
            .iters
            .iter()
            .filter(|(_, reader)| reader.as_str() == rw)
            .map(|(iter, _)| iter)
            .collect();
        if open.is_empty() {
            Ok(())
        } else {
            Err(format!("{} on {} with open iterators {:?}", op, rw, open))
        }
    }

    fn track_write(&mut self, rw: &str, txn: &str) {
        if rw != "engine" {
            self.txn_batches
                .entry(txn.to_string())
                .or_default()
                .insert(rw.to_string());
        }
    }

    fn apply(&mut self, op: &OpRun) -> Result<(), String> {
        let a = &op.args;
        match op.name() {
            "txn_open" => {
                self.txns.insert(a[1].clone());
            }
            "txn_commit" => {
                self.check_txn(&a[0])?;
                if let Some(batches) = self.txn_batches.get(&a[0]) {
                    if !batches.is_empty() {
                        return Err(format!("{} committed with unflushed batches {:?}", a[0], batches));
                    }
                }
                self.txns.remove(&a[0]);
            }
            "batch_open" => {
                self.batches.insert(a[0].clone());
            }
            "batch_commit" => {
                self.check_reader(&a[0])?;
                self.check_no_iters_on(&a[0], "batch_commit")?;
                self.batches.remove(&a[0]);
                for batches in self.txn_batches.values_mut() {
                    batches.remove(&a[0]);
                }
            }
            "iterator_open" => {
                self.check_reader(&a[0])?;
                self.check_no_iters_on(&a[0], "iterator_open")?;
                self.iters.insert(a[3].clone(), a[0].clone());
            }
            "iterator_close" => {
                self.check_iter(&a[0])?;
                self.iters.remove(&a[0]);
            }
            "iterator_seekge" | "iterator_seeklt" | "iterator_next" | "iterator_nextkey"
            | "iterator_prev" => self.check_iter(&a[0])?,
            "mvcc_put" | "mvcc_init_put" | "mvcc_delete_range" => {
                let txn = &a[a.len() - 1];
                self.check_reader(&a[0])?;
                if op.name() == "mvcc_delete_range" {
                    self.check_no_iters_on(&a[0], "mvcc_delete_range")?;
                }
                self.check_txn(txn)?;
                self.track_write(&a[0], txn);
            }
            "mvcc_conditional_put" => {
                self.check_reader(&a[0])?;
                self.check_txn(&a[4])?;
                self.track_write(&a[0], &a[4]);
            }
            "mvcc_delete" => {
                self.check_reader(&a[0])?;
                self.check_txn(&a[2])?;
                self.track_write(&a[0], &a[2]);
            }
            "mvcc_get" | "mvcc_inconsistent_get" => {
                self.check_reader(&a[0])?;
                if op.name() == "mvcc_get" {
                    self.check_txn(&a[2])?;
                }
            }
            "mvcc_clear_time_range" => {
                self.check_reader(&a[0])?;
                self.check_no_iters_on(&a[0], "mvcc_clear_time_range")?;
            }
            "mvcc_scan" | "mvcc_reverse_scan" => self.check_txn(&a[2])?,
            "restart" if self.restarts => {
                self.txns.clear();
                self.batches.clear();
                self.iters.clear();
                self.txn_batches.clear();
            }
            _ => {}
        }
        Ok(())
    }
}

fn generate(seed: u64, n: usize, restarts: bool) -> Vec<OpRun> {
    let mut gens = Generators::new(restarts);
    SequenceGenerator::new(seed)
        .generate(&mut gens, n)
        .unwrap()
}

fn check_liveness(ops: &[OpRun], restarts: bool) -> Result<(), String> {
    let mut model = Liveness {
        restarts,
        ..Liveness::default()
    };
    for (i, op) in ops.iter().enumerate() {
        model
            .apply(op)
            .map_err(|e| format!("op {} ({}): {}", i, op.command(), e))?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn generated_sequences_respect_resource_lifetimes(seed in any::<u64>(), restarts in any::<bool>()) {
        let ops = generate(seed, 300, restarts);
        prop_assert!(ops.len() >= 300);
        if let Err(e) = check_liveness(&ops, restarts) {
            prop_assert!(false, "{}", e);
        }
    }

    #[test]
    fn opener_ids_are_never_reused(seed in any::<u64>()) {
        let ops = generate(seed, 300, true);
        let mut seen = BTreeSet::new();
        for op in &ops {
            let id = match op.name() {
                "txn_open" => &op.args[1],
                "batch_open" => &op.args[0],
                "iterator_open" => &op.args[3],
                _ => continue,
            };
            prop_assert!(seen.insert(id.clone()), "{} opened twice", id);
        }
    }

    #[test]
    fn operand_counts_match_catalog(seed in any::<u64>()) {
        for op in generate(seed, 200, false) {
            prop_assert_eq!(op.args.len(), op.generator.operands.len());
        }
    }
}

#[test]
fn transaction_timestamps_strictly_increase() {
    let ops = generate(77, 1000, false);
    let stamps: Vec<u64> = ops
        .iter()
        .filter(|o| o.name() == "txn_open")
        .map(|o| o.args[0].parse().unwrap())
        .collect();
    assert!(stamps.len() > 1);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn scans_only_reference_the_engine() {
    for op in generate(3, 1000, false) {
        if matches!(op.name(), "mvcc_scan" | "mvcc_reverse_scan" | "mvcc_inconsistent_scan") {
            assert_eq!(op.args.len(), 3);
            assert!(!op.args.iter().any(|a| a.starts_with("batch")));
        }
    }
}

#[test]
fn batch_invalidations_follow_iterator_closes() {
    let mut invalidations = 0;
    for seed in 0..40 {
        let restarts = seed % 2 == 0;
        let ops = generate(seed, 500, restarts);
        check_liveness(&ops, restarts).unwrap();
        invalidations += ops
            .iter()
            .filter(|o| {
                matches!(
                    o.name(),
                    "batch_commit" | "iterator_open" | "mvcc_delete_range" | "mvcc_clear_time_range"
                ) && o.args[0].starts_with("batch")
            })
            .count();
    }
    assert!(invalidations > 0);
}

#[test]
fn model_rejects_commit_with_open_batch_iterator() {
    let mut model = Liveness::default();
    model.batches.insert("batch1".to_string());
    model.iters.insert("iter1".to_string(), "batch1".to_string());
    assert!(model.check_no_iters_on("batch1", "batch_commit").is_err());
    assert!(model.check_no_iters_on("engine", "batch_commit").is_ok());
    model.iters.remove("iter1");
    assert!(model.check_no_iters_on("batch1", "batch_commit").is_ok());
}
