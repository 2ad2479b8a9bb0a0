//! K-Means clustering for IVF partitioning.
//!
//! Implements Lloyd's algorithm with k-means++ initialization for
//! high-quality centroid placement. The IVF backend uses the trained
//! centroids to route vectors and queries to partitions.

use crate::constants::kmeans::{CONVERGENCE_THRESHOLD, DEFAULT_MAX_ITERATIONS, KMEANSPP_THRESHOLD};
use crate::distance::euclidean_distance_squared;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

/// K-Means clustering over raw f32 vectors.
pub struct KMeans {
    /// The computed cluster centroids.
    pub centroids: Vec<Vec<f32>>,
    /// Number of clusters.
    k: usize,
    /// Maximum iterations before stopping.
    max_iters: usize,
}

impl KMeans {
    /// Create a new K-Means instance with the default iteration budget.
    pub fn new(k: usize) -> Self {
        Self::with_max_iters(k, DEFAULT_MAX_ITERATIONS)
    }

    /// Create a new K-Means instance with an explicit iteration budget.
    pub fn with_max_iters(k: usize, max_iters: usize) -> Self {
        Self {
            centroids: Vec::new(),
            k,
            max_iters,
        }
    }

    /// Fit the model to the given vectors.
    ///
    /// Initializes centroids (k-means++ for small k, random sampling for
    /// large k where the O(k²n) seeding dominates) and iterates until
    /// convergence or the iteration budget is exhausted.
    pub fn fit(&mut self, vectors: &[&[f32]]) {
        if vectors.is_empty() || self.k == 0 {
            return;
        }

        let dim = vectors[0].len();

        self.centroids = if self.k > KMEANSPP_THRESHOLD {
            let mut rng = rand::thread_rng();
            let mut indices: Vec<usize> = (0..vectors.len()).collect();
            indices.shuffle(&mut rng);
            indices
                .into_iter()
                .take(self.k)
                .map(|i| vectors[i].to_vec())
                .collect()
        } else {
            self.plus_plus_init(vectors)
        };

        for _iter in 0..self.max_iters {
            let assignments = self.assign(vectors);
            let new_centroids = self.update_centroids(vectors, &assignments, dim);
            let change = self.measure_change(&new_centroids);

            self.centroids = new_centroids;

            if change < CONVERGENCE_THRESHOLD {
                break;
            }
        }
    }

    /// Index of the centroid nearest to `vector`.
    pub fn nearest_centroid(&self, vector: &[f32]) -> usize {
        nearest(&self.centroids, vector)
    }

    /// Initialize centroids using k-means++.
    ///
    /// Selects each next centroid with probability proportional to its
    /// squared distance from the existing centroids, spreading the seeds
    /// for faster convergence.
    fn plus_plus_init(&self, vectors: &[&[f32]]) -> Vec<Vec<f32>> {
        let mut rng = rand::thread_rng();
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(self.k);

        if let Some(first) = vectors.choose(&mut rng) {
            centroids.push(first.to_vec());
        }

        while centroids.len() < self.k {
            let distances: Vec<f32> = vectors
                .par_iter()
                .map(|v| {
                    centroids
                        .iter()
                        .map(|c| euclidean_distance_squared(v, c))
                        .fold(f32::MAX, f32::min)
                })
                .collect();

            let total: f32 = distances.iter().sum();
            if total == 0.0 {
                // All vectors coincide with existing centroids
                if let Some(v) = vectors.choose(&mut rng) {
                    centroids.push(v.to_vec());
                }
                continue;
            }

            let mut r = rng.gen_range(0.0..total);
            let mut selected = None;
            for (i, &d) in distances.iter().enumerate() {
                r -= d;
                if r <= 0.0 {
                    selected = Some(i);
                    break;
                }
            }
            // Floating point edge case: fall back to the last candidate
            let i = selected.unwrap_or(vectors.len() - 1);
            centroids.push(vectors[i].to_vec());
        }

        centroids
    }

    /// Assign each vector to its nearest centroid.
    fn assign(&self, vectors: &[&[f32]]) -> Vec<usize> {
        vectors
            .par_iter()
            .map(|v| nearest(&self.centroids, v))
            .collect()
    }

    /// Update centroids to the element-wise mean of their assigned vectors.
    /// Empty clusters retain their old centroid.
    fn update_centroids(
        &self,
        vectors: &[&[f32]],
        assignments: &[usize],
        dim: usize,
    ) -> Vec<Vec<f32>> {
        (0..self.k)
            .into_par_iter()
            .map(|k| {
                let mut mean = vec![0.0f32; dim];
                let mut count = 0usize;

                for (v, &a) in vectors.iter().zip(assignments.iter()) {
                    if a == k {
                        for (m, &val) in mean.iter_mut().zip(v.iter()) {
                            *m += val;
                        }
                        count += 1;
                    }
                }

                if count == 0 {
                    return self.centroids[k].clone();
                }

                let count = count as f32;
                for val in &mut mean {
                    *val /= count;
                }
                mean
            })
            .collect()
    }

    /// Average movement of the centroids since the previous iteration.
    fn measure_change(&self, new_centroids: &[Vec<f32>]) -> f32 {
        if self.centroids.is_empty() {
            return f32::MAX;
        }

        let total: f32 = self
            .centroids
            .iter()
            .zip(new_centroids.iter())
            .map(|(old, new)| euclidean_distance_squared(old, new))
            .sum();

        total / self.centroids.len() as f32
    }
}

/// Index of the centroid nearest to `vector` under squared L2.
fn nearest(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx, euclidean_distance_squared(vector, c)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_data() -> Vec<Vec<f32>> {
        // Two well-separated clusters around (0, 0) and (10, 10)
        let mut data = Vec::new();
        for i in 0..50 {
            let jitter = (i % 5) as f32 * 0.01;
            data.push(vec![jitter, -jitter]);
            data.push(vec![10.0 + jitter, 10.0 - jitter]);
        }
        data
    }

    #[test]
    fn test_fit_separates_clusters() {
        let data = clustered_data();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();

        let mut kmeans = KMeans::new(2);
        kmeans.fit(&refs);

        assert_eq!(kmeans.centroids.len(), 2);

        // The two centroids should land near the two cluster centers
        let near_origin = kmeans
            .centroids
            .iter()
            .any(|c| euclidean_distance_squared(c, &[0.0, 0.0]) < 1.0);
        let near_ten = kmeans
            .centroids
            .iter()
            .any(|c| euclidean_distance_squared(c, &[10.0, 10.0]) < 1.0);
        assert!(near_origin && near_ten);
    }

    #[test]
    fn test_nearest_centroid() {
        let data = clustered_data();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();

        let mut kmeans = KMeans::new(2);
        kmeans.fit(&refs);

        let a = kmeans.nearest_centroid(&[0.1, 0.1]);
        let b = kmeans.nearest_centroid(&[9.9, 9.9]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fit_empty_input() {
        let mut kmeans = KMeans::new(4);
        kmeans.fit(&[]);
        assert!(kmeans.centroids.is_empty());
    }

    #[test]
    fn test_fit_more_clusters_than_points() {
        let data = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();

        let mut kmeans = KMeans::new(4);
        kmeans.fit(&refs);
        assert_eq!(kmeans.centroids.len(), 4);
    }
}
