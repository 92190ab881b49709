//! Randomized churn: the change manager against a naive set-based mirror.
//!
//! Random appends, rewrites and removals hit a table; after every refresh
//! the change manager must agree with a mirror that recomputes the diffs
//! with plain set algebra (no prefix fast path), and random partial drains
//! must pop identical spans from both.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use trickle::{ChangeManager, MemTable, RowIndex, RunNumber, Value};

#[derive(Default)]
struct Mirror {
    last: Option<u64>,
    index: BTreeSet<RowIndex>,
    created: BTreeSet<RowIndex>,
    updated: BTreeSet<RowIndex>,
    deleted: BTreeSet<RowIndex>,
}

impl Mirror {
    fn update(&mut self, run: u64, table: &MemTable) {
        use trickle::Table;
        let current: BTreeSet<RowIndex> = table.index().into_iter().collect();
        match self.last {
            None => {
                self.created = current.clone();
            }
            Some(last) => {
                let deleted: BTreeSet<_> = self.index.difference(&current).copied().collect();
                let mut updated: BTreeSet<_> = self
                    .index
                    .intersection(&current)
                    .copied()
                    .filter(|&i| {
                        table
                            .stamp(i)
                            .map_or(false, |s| s > RunNumber::from(last))
                    })
                    .collect();
                let fresh: BTreeSet<_> = current.difference(&self.index).copied().collect();
                // an update to a still-buffered created row is redundant
                updated = updated.difference(&self.created).copied().collect();
                self.created = self
                    .created
                    .difference(&deleted)
                    .copied()
                    .chain(fresh)
                    .collect();
                self.updated = self
                    .updated
                    .difference(&deleted)
                    .copied()
                    .chain(updated)
                    .collect();
                self.deleted.extend(deleted);
            }
        }
        self.index = current;
        self.last = Some(run);
    }

    fn pop(set: &mut BTreeSet<RowIndex>, n: usize) -> Vec<RowIndex> {
        let head: Vec<RowIndex> = set.iter().copied().take(n).collect();
        for i in &head {
            set.remove(i);
        }
        head
    }
}

fn pick(set: &BTreeSet<RowIndex>, rng: &mut StdRng) -> Option<RowIndex> {
    if set.is_empty() {
        return None;
    }
    let all: Vec<RowIndex> = set.iter().copied().collect();
    Some(all[rng.gen_range(0..all.len())])
}

#[test]
fn randomized_churn_matches_naive_mirror() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let table = MemTable::new(vec!["x".to_owned()]);
    let mut cm = ChangeManager::new(true, true, true);
    let mut mirror = Mirror::default();
    let mut live: BTreeSet<RowIndex> = BTreeSet::new();
    let mut ever_created: BTreeSet<RowIndex> = BTreeSet::new();

    for round in 1..=300u64 {
        let run = RunNumber::from(round);
        for _ in 0..rng.gen_range(0..6) {
            match rng.gen_range(0..3) {
                0 => {
                    let row = table.append_row(vec![Value::Null], run);
                    live.insert(row);
                }
                1 => {
                    if let Some(row) = pick(&live, &mut rng) {
                        table.write(row, "x", Value::Int(round as i64), run);
                    }
                }
                _ => {
                    if let Some(row) = pick(&live, &mut rng) {
                        table.remove_row(row);
                        live.remove(&row);
                    }
                }
            }
        }

        cm.update(run, &table);
        mirror.update(round, &table);

        assert_eq!(cm.created_length(), mirror.created.len(), "round {}", round);
        assert_eq!(cm.updated_length(), mirror.updated.len(), "round {}", round);
        assert_eq!(cm.deleted_length(), mirror.deleted.len(), "round {}", round);

        // the three pending sets stay pairwise disjoint
        assert!(mirror.created.is_disjoint(&mirror.updated), "round {}", round);
        assert!(mirror.created.is_disjoint(&mirror.deleted), "round {}", round);
        assert!(mirror.updated.is_disjoint(&mirror.deleted), "round {}", round);

        // random partial drains pop identical FIFO spans
        let k = rng.gen_range(0..4);
        let drained = cm.next_created(Some(k)).to_vec();
        assert_eq!(drained, Mirror::pop(&mut mirror.created, k));
        for row in &drained {
            // a row is delivered as created at most once
            assert!(ever_created.insert(*row), "row {} delivered twice", row);
        }
        let k = rng.gen_range(0..3);
        assert_eq!(
            cm.next_updated(Some(k)).to_vec(),
            Mirror::pop(&mut mirror.updated, k)
        );
        let k = rng.gen_range(0..3);
        assert_eq!(
            cm.next_deleted(Some(k)).to_vec(),
            Mirror::pop(&mut mirror.deleted, k)
        );
    }

    // drain to the end: everything still alive was delivered exactly once
    let rest = cm.next_created(None).to_vec();
    for row in rest {
        assert!(ever_created.insert(row));
    }
    assert!(live.iter().all(|i| ever_created.contains(i)));
}
