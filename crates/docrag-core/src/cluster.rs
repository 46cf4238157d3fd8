//! K-means over chunk embeddings and nearest-to-centroid exemplar picking.
//!
//! Centroids are seeded with k-means++ from a fixed RNG seed, so identical
//! inputs always give identical groups. Exemplars for a cluster are the
//! points of the *whole* population closest to its centroid, not only the
//! members assigned to it.
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::traits::Embedder;
use crate::types::{Chunk, ClusterParams};

/// Per-cluster exemplar indices plus their sorted, de-duplicated union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    /// One entry per cluster, nearest first.
    pub groups: Vec<Vec<usize>>,
    pub selected: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterEngine {
    seed: u64,
    max_iterations: usize,
}

impl Default for ClusterEngine {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

impl ClusterEngine {
    pub fn new(seed: u64, max_iterations: usize) -> Self {
        Self { seed, max_iterations: max_iterations.max(1) }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.seed, config.max_iterations)
    }

    /// Embed `chunks` in one batch and return the exemplar groups as chunks.
    pub fn cluster(&self, embedder: &dyn Embedder, chunks: &[Chunk], params: &ClusterParams) -> Result<Vec<Vec<Chunk>>> {
        validate(chunks.len(), params)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .map_err(|e| Error::Operation(format!("embedding chunks for clustering: {e}")))?;
        if vectors.len() != chunks.len() {
            return Err(Error::Operation(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let assignment = self.assign(&vectors, params)?;
        info!(
            clusters = assignment.groups.len(),
            exemplars = assignment.selected.len(),
            chunks = chunks.len(),
            "clustered chunks"
        );
        Ok(assignment
            .groups
            .iter()
            .map(|group| group.iter().map(|&i| chunks[i].clone()).collect())
            .collect())
    }

    /// Cluster raw vectors. Fails with `ClusterConfig` unless
    /// `1 <= num_clusters <= vectors.len()` and `cluster_samples >= 1`.
    pub fn assign(&self, vectors: &[Vec<f32>], params: &ClusterParams) -> Result<ClusterAssignment> {
        validate(vectors.len(), params)?;
        let dim = vectors[0].len();
        if vectors.iter().any(|v| v.len() != dim) {
            return Err(Error::ClusterConfig("vectors have differing dimensions".to_string()));
        }

        let centroids = self.kmeans(vectors, params.num_clusters);
        let take = params.cluster_samples.min(vectors.len());
        let groups: Vec<Vec<usize>> = centroids.iter().map(|c| nearest(vectors, c, take)).collect();

        let mut selected: Vec<usize> = groups.iter().flatten().copied().collect();
        selected.sort_unstable();
        selected.dedup();
        Ok(ClusterAssignment { groups, selected })
    }

    fn kmeans(&self, vectors: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = init_plus_plus(vectors, k, &mut rng);
        let mut labels: Vec<usize> = vec![usize::MAX; vectors.len()];

        for iteration in 0..self.max_iterations {
            let mut changed = false;
            for (label, v) in labels.iter_mut().zip(vectors) {
                let best = closest(&centroids, v);
                if *label != best {
                    *label = best;
                    changed = true;
                }
            }
            if !changed {
                debug!(iteration, "k-means converged");
                break;
            }
            update_centroids(&mut centroids, vectors, &labels);
        }
        centroids
    }
}

fn validate(population: usize, params: &ClusterParams) -> Result<()> {
    if params.num_clusters == 0 {
        return Err(Error::ClusterConfig("num_clusters must be at least 1".to_string()));
    }
    if params.num_clusters > population {
        return Err(Error::ClusterConfig(format!(
            "n_samples={population} should be >= n_clusters={}",
            params.num_clusters
        )));
    }
    if params.cluster_samples == 0 {
        return Err(Error::ClusterConfig("cluster_samples must be at least 1".to_string()));
    }
    Ok(())
}

fn init_plus_plus(vectors: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(vectors[rng.gen_range(0..vectors.len())].clone());
    let mut d2: Vec<f32> = vectors.iter().map(|v| squared_distance(v, &centroids[0])).collect();

    while centroids.len() < k {
        let pick = match WeightedIndex::new(&d2) {
            Ok(dist) => dist.sample(rng),
            // every point already coincides with a centroid
            Err(_) => rng.gen_range(0..vectors.len()),
        };
        let chosen = vectors[pick].clone();
        for (d, v) in d2.iter_mut().zip(vectors) {
            *d = d.min(squared_distance(v, &chosen));
        }
        centroids.push(chosen);
    }
    centroids
}

/// Mean of each cluster's members; an empty cluster keeps its old centroid.
fn update_centroids(centroids: &mut [Vec<f32>], vectors: &[Vec<f32>], labels: &[usize]) {
    let dim = centroids.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0f32; dim]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (v, &label) in vectors.iter().zip(labels) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(v) {
            *s += x;
        }
    }
    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let n = count as f32;
            *centroid = sum.into_iter().map(|s| s / n).collect();
        }
    }
}

fn closest(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    centroids
        .iter()
        .map(|c| squared_distance(v, c))
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

/// Indices of the `take` points nearest to `centroid`, ties by index.
fn nearest(vectors: &[Vec<f32>], centroid: &[f32], take: usize) -> Vec<usize> {
    let mut ranked: Vec<(f32, usize)> =
        vectors.iter().enumerate().map(|(i, v)| (squared_distance(v, centroid), i)).collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    ranked.into_iter().take(take).map(|(_, i)| i).collect()
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
