//! Histogram-based regression tree growers
//!
//! Trees are fitted to fixed-point gradients and hessians with i128 gain
//! arithmetic and deterministic tie-breaking, so identical inputs always
//! give identical trees. Three growth policies cover the strategy family:
//! - `DepthWise`: level by level up to `max_depth`
//! - `LeafWise`: always split the leaf with the largest gain, up to `max_leaves`
//! - `Symmetric`: oblivious trees, one shared split per level

use obesity_core::deterministic::SplitTieBreaker;
use obesity_core::gbdt::{Node, Tree, SCALE};

/// Fixed-point feature columns quantized into ordered bins.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    /// `bins[f][row]`
    bins: Vec<Vec<u16>>,
    /// `thresholds[f][b]` is the largest value falling in bin `b`
    thresholds: Vec<Vec<i64>>,
    n_rows: usize,
}

impl BinnedMatrix {
    /// Quantize rows of fixed-point features into at most `max_bins` bins
    /// per feature. Features with few distinct values get one bin each.
    pub fn build(rows: &[Vec<i64>], max_bins: usize) -> Self {
        let n_rows = rows.len();
        let n_features = rows.first().map_or(0, Vec::len);
        let max_bins = max_bins.clamp(2, u16::MAX as usize);

        let mut bins = Vec::with_capacity(n_features);
        let mut thresholds = Vec::with_capacity(n_features);
        for f in 0..n_features {
            let mut values: Vec<i64> = rows.iter().map(|r| r[f]).collect();
            values.sort_unstable();
            values.dedup();
            let cuts: Vec<i64> = if values.len() <= max_bins {
                values
            } else {
                (1..=max_bins)
                    .map(|i| values[(i * values.len()) / max_bins - 1])
                    .collect()
            };
            let column: Vec<u16> = rows
                .iter()
                .map(|r| cuts.partition_point(|t| *t < r[f]) as u16)
                .collect();
            bins.push(column);
            thresholds.push(cuts);
        }

        Self {
            bins,
            thresholds,
            n_rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.bins.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len()
    }

    pub fn threshold(&self, feature: usize, bin: usize) -> i64 {
        self.thresholds[feature][bin]
    }

    fn bin(&self, feature: usize, row: usize) -> usize {
        self.bins[feature][row] as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    DepthWise,
    LeafWise,
    Symmetric,
}

/// Structural limits and regularization for one tree. Fixed-point fields
/// are at `SCALE`.
#[derive(Debug, Clone)]
pub struct TreeParams {
    pub policy: GrowthPolicy,
    pub max_depth: usize,
    pub max_leaves: usize,
    pub min_samples_leaf: usize,
    pub min_child_weight: i64,
    pub lambda: i64,
    pub gamma: i64,
    pub max_leaf_value: i64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            policy: GrowthPolicy::DepthWise,
            max_depth: 4,
            max_leaves: usize::MAX,
            min_samples_leaf: 1,
            min_child_weight: 0,
            lambda: SCALE,
            gamma: 0,
            max_leaf_value: 4 * SCALE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GradStats {
    g: i64,
    h: i64,
    n: usize,
}

impl GradStats {
    fn add(&mut self, g: i64, h: i64) {
        self.g = self.g.saturating_add(g);
        self.h = self.h.saturating_add(h);
        self.n += 1;
    }

    fn minus(self, other: GradStats) -> GradStats {
        GradStats {
            g: self.g - other.g,
            h: self.h - other.h,
            n: self.n - other.n,
        }
    }
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    threshold: i64,
    gain: i128,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    stats: GradStats,
    best: Option<SplitCandidate>,
}

/// Grows one tree over a row subset.
pub struct TreeGrower<'a> {
    data: &'a BinnedMatrix,
    grad: &'a [i64],
    hess: &'a [i64],
    params: &'a TreeParams,
}

impl<'a> TreeGrower<'a> {
    pub fn new(
        data: &'a BinnedMatrix,
        grad: &'a [i64],
        hess: &'a [i64],
        params: &'a TreeParams,
    ) -> Self {
        debug_assert_eq!(data.n_rows(), grad.len());
        debug_assert_eq!(data.n_rows(), hess.len());
        Self {
            data,
            grad,
            hess,
            params,
        }
    }

    /// Grow a tree on `rows`; `weight` is the shrinkage stored on the tree.
    pub fn grow(&self, rows: &[usize], weight: i64) -> Tree {
        match self.params.policy {
            GrowthPolicy::DepthWise | GrowthPolicy::LeafWise => self.grow_greedy(rows, weight),
            GrowthPolicy::Symmetric => self.grow_symmetric(rows, weight),
        }
    }

    fn stats(&self, rows: &[usize]) -> GradStats {
        let mut stats = GradStats::default();
        for &r in rows {
            stats.add(self.grad[r], self.hess[r]);
        }
        stats
    }

    fn histogram(&self, rows: &[usize], feature: usize) -> Vec<GradStats> {
        let mut hist = vec![GradStats::default(); self.data.n_bins(feature)];
        for &r in rows {
            hist[self.data.bin(feature, r)].add(self.grad[r], self.hess[r]);
        }
        hist
    }

    /// Structure score `G^2 / (H + lambda)` in fixed-point
    fn score(&self, stats: GradStats) -> i128 {
        let denom = stats.h as i128 + self.params.lambda as i128;
        if denom <= 0 {
            return 0;
        }
        (stats.g as i128 * stats.g as i128) / denom
    }

    /// Newton step `-G / (H + lambda)`, clamped
    fn leaf_value(&self, stats: GradStats) -> i64 {
        let denom = stats.h as i128 + self.params.lambda as i128;
        if denom <= 0 {
            return 0;
        }
        let value = -(stats.g as i128 * SCALE as i128) / denom;
        let cap = self.params.max_leaf_value as i128;
        value.clamp(-cap, cap) as i64
    }

    fn child_ok(&self, stats: GradStats) -> bool {
        stats.n >= self.params.min_samples_leaf && stats.h >= self.params.min_child_weight
    }

    fn best_split(&self, rows: &[usize], total: GradStats, node_id: usize) -> Option<SplitCandidate> {
        if total.n < 2 * self.params.min_samples_leaf.max(1) {
            return None;
        }
        let parent = self.score(total);
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..self.data.n_features() {
            let hist = self.histogram(rows, feature);
            let mut left = GradStats::default();
            for bin in 0..hist.len().saturating_sub(1) {
                if hist[bin].n == 0 {
                    continue;
                }
                left.g += hist[bin].g;
                left.h += hist[bin].h;
                left.n += hist[bin].n;
                let right = total.minus(left);
                if right.n == 0 {
                    break;
                }
                if !self.child_ok(left) || !self.child_ok(right) {
                    continue;
                }
                let gain = self.score(left) + self.score(right) - parent;
                if gain <= self.params.gamma as i128 {
                    continue;
                }
                let threshold = self.data.threshold(feature, bin);
                let candidate = SplitCandidate {
                    feature,
                    bin,
                    threshold,
                    gain,
                    tie_breaker: SplitTieBreaker::new(feature, threshold, node_id),
                };
                if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn partition(&self, rows: &[usize], split: &SplitCandidate) -> (Vec<usize>, Vec<usize>) {
        rows.iter()
            .partition(|&&r| self.data.bin(split.feature, r) <= split.bin)
    }

    fn open_leaf(&self, node: usize, rows: Vec<usize>, depth: usize) -> OpenLeaf {
        let stats = self.stats(&rows);
        let best = if depth < self.params.max_depth {
            self.best_split(&rows, stats, node)
        } else {
            None
        };
        OpenLeaf {
            node,
            rows,
            depth,
            stats,
            best,
        }
    }

    fn grow_greedy(&self, rows: &[usize], weight: i64) -> Tree {
        let mut nodes = vec![Node::leaf(0, 0)];
        let mut open = vec![self.open_leaf(0, rows.to_vec(), 0)];
        let mut leaves = 1usize;

        while leaves < self.params.max_leaves {
            let pick = match self.params.policy {
                GrowthPolicy::LeafWise => open
                    .iter()
                    .enumerate()
                    .filter(|(_, leaf)| leaf.best.is_some())
                    .max_by(|(_, a), (_, b)| {
                        let (ga, gb) = (gain_of(a), gain_of(b));
                        ga.cmp(&gb).then(b.node.cmp(&a.node))
                    })
                    .map(|(i, _)| i),
                _ => open.iter().position(|leaf| leaf.best.is_some()),
            };
            let Some(index) = pick else {
                break;
            };

            let leaf = open.remove(index);
            let Some(split) = leaf.best.as_ref() else {
                break;
            };
            let (left_rows, right_rows) = self.partition(&leaf.rows, split);
            let left = nodes.len();
            let right = left + 1;
            nodes[leaf.node] = Node::internal(
                leaf.node as i32,
                split.feature as i32,
                split.threshold,
                left as i32,
                right as i32,
            );
            nodes.push(Node::leaf(left as i32, 0));
            nodes.push(Node::leaf(right as i32, 0));
            leaves += 1;

            open.push(self.open_leaf(left, left_rows, leaf.depth + 1));
            open.push(self.open_leaf(right, right_rows, leaf.depth + 1));
        }

        for leaf in &open {
            nodes[leaf.node] = Node::leaf(leaf.node as i32, self.leaf_value(leaf.stats));
        }
        Tree::new(nodes, weight)
    }

    fn grow_symmetric(&self, rows: &[usize], weight: i64) -> Tree {
        let mut groups: Vec<Vec<usize>> = vec![rows.to_vec()];
        let mut levels: Vec<(usize, i64)> = Vec::new();

        for depth in 0..self.params.max_depth {
            let stats: Vec<GradStats> = groups.iter().map(|g| self.stats(g)).collect();
            let parent: i128 = stats.iter().map(|s| self.score(*s)).sum();
            let mut best: Option<SplitCandidate> = None;

            for feature in 0..self.data.n_features() {
                let hists: Vec<Vec<GradStats>> =
                    groups.iter().map(|g| self.histogram(g, feature)).collect();
                let mut lefts = vec![GradStats::default(); groups.len()];
                for bin in 0..self.data.n_bins(feature).saturating_sub(1) {
                    if hists.iter().all(|h| h[bin].n == 0) {
                        continue;
                    }
                    let mut gain = -parent;
                    let mut useful = false;
                    for (i, hist) in hists.iter().enumerate() {
                        lefts[i].g += hist[bin].g;
                        lefts[i].h += hist[bin].h;
                        lefts[i].n += hist[bin].n;
                        let right = stats[i].minus(lefts[i]);
                        gain += self.score(lefts[i]) + self.score(right);
                        useful |= self.child_ok(lefts[i]) && self.child_ok(right);
                    }
                    if !useful || gain <= self.params.gamma as i128 {
                        continue;
                    }
                    let threshold = self.data.threshold(feature, bin);
                    let candidate = SplitCandidate {
                        feature,
                        bin,
                        threshold,
                        gain,
                        tie_breaker: SplitTieBreaker::new(feature, threshold, depth),
                    };
                    if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                        best = Some(candidate);
                    }
                }
            }

            let Some(split) = best else {
                break;
            };
            groups = groups
                .iter()
                .flat_map(|g| {
                    let (l, r) = self.partition(g, &split);
                    [l, r]
                })
                .collect();
            levels.push((split.feature, split.threshold));
        }

        // Complete binary tree in breadth-first order.
        let internal = (1usize << levels.len()) - 1;
        let mut nodes = Vec::with_capacity(internal + groups.len());
        for i in 0..internal {
            let level = (usize::BITS - (i + 1).leading_zeros() - 1) as usize;
            let (feature, threshold) = levels[level];
            nodes.push(Node::internal(
                i as i32,
                feature as i32,
                threshold,
                (2 * i + 1) as i32,
                (2 * i + 2) as i32,
            ));
        }
        for (j, group) in groups.iter().enumerate() {
            let id = internal + j;
            nodes.push(Node::leaf(id as i32, self.leaf_value(self.stats(group))));
        }
        Tree::new(nodes, weight)
    }
}

fn gain_of(leaf: &OpenLeaf) -> i128 {
    leaf.best.as_ref().map_or(i128::MIN, |b| b.gain)
}
