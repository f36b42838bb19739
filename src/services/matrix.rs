/// Sparse similarity engine
///
/// Builds a sparse actor x target score matrix from pair scores and extracts
/// top-k cosine neighbors per user. This is the expensive step of the
/// pipeline (O(rows^2 * nnz) in the worst case) and runs inside the periodic
/// neighbor-refresh batch job, never per request.
use std::collections::HashMap;

use crate::models::{PairScore, UserNeighbor};

/// Bidirectional mapping between real user IDs and dense matrix positions.
///
/// Actors and targets are independent ID spaces: a user appearing as both
/// gets separate row and column positions. Row/column order is the sorted
/// order of IDs, which makes construction deterministic.
#[derive(Debug, Clone, Default)]
pub struct ActorTargetIndex {
    pub actor_to_row: HashMap<i64, usize>,
    pub row_to_actor: Vec<i64>,
    pub target_to_col: HashMap<i64, usize>,
    pub col_to_target: Vec<i64>,
}

impl ActorTargetIndex {
    pub fn build(pairs: &[PairScore]) -> Self {
        let mut actor_ids: Vec<i64> = pairs.iter().map(|p| p.actor_user_id).collect();
        actor_ids.sort_unstable();
        actor_ids.dedup();

        let mut target_ids: Vec<i64> = pairs.iter().map(|p| p.target_user_id).collect();
        target_ids.sort_unstable();
        target_ids.dedup();

        let actor_to_row = actor_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let target_to_col = target_ids.iter().enumerate().map(|(j, id)| (*id, j)).collect();

        Self {
            actor_to_row,
            row_to_actor: actor_ids,
            target_to_col,
            col_to_target: target_ids,
        }
    }
}

/// Row-major compressed sparse matrix.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix {
    pub rows: usize,
    pub cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Non-zero (column, value) entries of one row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_idx[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    fn row_norm(&self, row: usize) -> f64 {
        self.row(row).map(|(_, v)| v * v).sum::<f64>().sqrt()
    }
}

/// Per actor, keep only the `k` highest-scoring target pairs. Pairs with
/// non-positive scores are dropped first; ties keep input order (stable sort).
pub fn prune_topk_per_actor(pairs: &[PairScore], k: usize) -> Vec<PairScore> {
    let mut by_actor: HashMap<i64, Vec<PairScore>> = HashMap::new();
    let mut actor_order: Vec<i64> = Vec::new();
    for p in pairs {
        if p.score <= 0.0 {
            continue;
        }
        let entry = by_actor.entry(p.actor_user_id).or_default();
        if entry.is_empty() {
            actor_order.push(p.actor_user_id);
        }
        entry.push(*p);
    }

    let mut pruned = Vec::new();
    for actor in actor_order {
        let mut list = by_actor.remove(&actor).unwrap_or_default();
        list.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        list.truncate(k);
        pruned.extend(list);
    }
    pruned
}

/// Build the sparse actor x target matrix and its index from pair scores,
/// applying top-k pruning first. Empty input yields a 0x0 matrix.
pub fn build_matrix(pairs: &[PairScore], topk_per_actor: usize) -> (SparseMatrix, ActorTargetIndex) {
    if pairs.is_empty() {
        return (SparseMatrix::default(), ActorTargetIndex::default());
    }

    let pruned = if topk_per_actor > 0 {
        prune_topk_per_actor(pairs, topk_per_actor)
    } else {
        pairs.to_vec()
    };
    if pruned.is_empty() {
        return (SparseMatrix::default(), ActorTargetIndex::default());
    }

    let index = ActorTargetIndex::build(&pruned);
    let rows = index.row_to_actor.len();
    let cols = index.col_to_target.len();

    // Bucket entries per row, column-sorted, then flatten to CSR.
    let mut row_entries: Vec<Vec<(usize, f64)>> = vec![Vec::new(); rows];
    for p in &pruned {
        // Index misses here would mean the index was not built from these
        // pairs, which is a programming error.
        let r = index.actor_to_row[&p.actor_user_id];
        let c = index.target_to_col[&p.target_user_id];
        row_entries[r].push((c, p.score));
    }

    let mut row_ptr = Vec::with_capacity(rows + 1);
    let mut col_idx = Vec::with_capacity(pruned.len());
    let mut values = Vec::with_capacity(pruned.len());
    row_ptr.push(0);
    for entries in &mut row_entries {
        entries.sort_unstable_by_key(|(c, _)| *c);
        for (c, v) in entries.iter() {
            col_idx.push(*c);
            values.push(*v);
        }
        row_ptr.push(col_idx.len());
    }

    (
        SparseMatrix {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        },
        index,
    )
}

/// Top-k cosine neighbors per row of the matrix.
///
/// Similarity between two rows is their normalized dot product; a zero-norm
/// row has similarity 0 with everything. The diagonal (self) is excluded.
/// Rows with no positive similarity to any other row produce no neighbors.
/// Ties sort by neighbor row ascending so output is deterministic.
pub fn topk_neighbors(matrix: &SparseMatrix, index: &ActorTargetIndex, k: usize) -> Vec<UserNeighbor> {
    if matrix.rows == 0 || k == 0 {
        return Vec::new();
    }

    let norms: Vec<f64> = (0..matrix.rows).map(|r| matrix.row_norm(r)).collect();

    // Column-inverted postings so each row only joins rows it shares a
    // column with, instead of a dense rows x rows pass.
    let mut col_postings: Vec<Vec<(usize, f64)>> = vec![Vec::new(); matrix.cols];
    for r in 0..matrix.rows {
        for (c, v) in matrix.row(r) {
            col_postings[c].push((r, v));
        }
    }

    let mut neighbors = Vec::new();
    let mut dots: HashMap<usize, f64> = HashMap::new();
    for r in 0..matrix.rows {
        if norms[r] <= 0.0 {
            continue;
        }
        dots.clear();
        for (c, v) in matrix.row(r) {
            for (other, w) in &col_postings[c] {
                if *other != r {
                    *dots.entry(*other).or_insert(0.0) += v * w;
                }
            }
        }

        let mut sims: Vec<(usize, f64)> = dots
            .iter()
            .filter(|(other, dot)| norms[**other] > 0.0 && **dot > 0.0)
            .map(|(other, dot)| (*other, dot / (norms[r] * norms[*other])))
            .collect();
        sims.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        sims.truncate(k);

        let user_id = index.row_to_actor[r];
        neighbors.extend(sims.into_iter().map(|(other, similarity)| UserNeighbor {
            user_id,
            neighbor_id: index.row_to_actor[other],
            similarity,
        }));
    }
    neighbors
}
