use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::error::{Result, SegmentError};
use crate::point::Point;

/// Two clusters: binary segmentation.
pub const DEFAULT_CLUSTERS: usize = 2;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_EPSILON: f32 = 1e-4;

// ------------------------------------------------------------
// Configuration
// ------------------------------------------------------------

/// Strategy deciding when Lloyd iterations may stop early.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Convergence {
    /// Stop once no centroid moved farther than `epsilon` since the previous iteration.
    FixedPoint { epsilon: f32 },
    /// Stop as soon as no centroid channel is NaN.
    ///
    /// Compatibility mode for the historical tool. In practice this stops after the first
    /// iteration, which is rarely a fixed point.
    LegacyNan,
}

impl Default for Convergence {
    fn default() -> Self {
        Convergence::FixedPoint {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Convergence {
    /// `previous` and `current` are the centroids before and after one update step.
    pub fn is_converged(&self, previous: &[Point], current: &[Point]) -> bool {
        match *self {
            // NaN distances compare false, so a NaN centroid never counts as settled.
            Convergence::FixedPoint { epsilon } => previous
                .iter()
                .zip(current)
                .all(|(before, after)| before.distance(after) <= epsilon),
            Convergence::LegacyNan => !current.iter().any(Point::has_nan),
        }
    }
}

/// Parameters of a single k-means run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KMeansConfig {
    /// Number of clusters. Fixed for the whole run.
    pub k: usize,
    /// Upper bound on assignment/update rounds. Hitting it is not an error.
    pub max_iterations: usize,
    pub convergence: Convergence,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence: Convergence::default(),
        }
    }
}

impl KMeansConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_convergence(mut self, convergence: Convergence) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SegmentError::InvalidClusterCount(self.k));
        }
        if let Convergence::FixedPoint { epsilon } = self.convergence {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(SegmentError::InvalidEpsilon(epsilon));
            }
        }
        Ok(())
    }
}

/// Outcome of a k-means run.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansResult {
    /// Exactly `k` centroids. An empty cluster keeps the last value it had.
    pub centroids: Vec<Point>,
    /// Nearest-centroid index for every input point, computed against `centroids`.
    pub labels: Vec<usize>,
    /// Number of points per cluster in `labels`.
    pub cluster_sizes: Vec<usize>,
    /// Assignment/update rounds actually performed.
    pub iterations: usize,
    /// `false` when the iteration budget ran out first.
    pub converged: bool,
}

// ------------------------------------------------------------
// Lloyd steps
// ------------------------------------------------------------

/// Pick `k` starting centroids uniformly from `points`, with replacement.
///
/// The same point may be drawn more than once. Both centroids then start identical and one of
/// the clusters ends up empty; this is kept as-is rather than reseeded.
pub fn init_centroids<R: Rng>(points: &[Point], k: usize, rng: &mut R) -> Vec<Point> {
    if points.is_empty() {
        return vec![Point::default(); k];
    }

    let picks: Vec<usize> = (0..k).map(|_| rng.random_range(0..points.len())).collect();
    for (i, pick) in picks.iter().enumerate() {
        if picks[..i].contains(pick) {
            warn!(point = pick, centroid = i, "initial centroid drawn twice");
        }
    }
    picks.into_iter().map(|i| points[i]).collect()
}

/// Index of the centroid closest to `point`. The lowest index wins ties.
#[inline(always)]
pub fn nearest(point: &Point, centroids: &[Point]) -> usize {
    let mut closest = 0;
    let mut min_distance = f32::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = point.distance(centroid);
        if distance < min_distance {
            min_distance = distance;
            closest = i;
        }
    }
    closest
}

/// Assignment step: label every point with its nearest centroid.
pub fn assign(points: &[Point], centroids: &[Point]) -> Vec<usize> {
    points.iter().map(|p| nearest(p, centroids)).collect()
}

/// Update step: move each non-empty cluster's centroid to the mean of its members.
///
/// Empty clusters keep their previous centroid. Returns the cluster sizes.
pub fn update(points: &[Point], labels: &[usize], centroids: &mut [Point]) -> Vec<usize> {
    debug_assert_eq!(points.len(), labels.len());

    let k = centroids.len();
    let mut sums = vec![[0.0f64; 3]; k];
    let mut sizes = vec![0usize; k];

    for (point, &label) in points.iter().zip(labels) {
        let sum = &mut sums[label];
        sum[0] += point.x as f64;
        sum[1] += point.y as f64;
        sum[2] += point.z as f64;
        sizes[label] += 1;
    }

    for ((centroid, sum), &size) in centroids.iter_mut().zip(&sums).zip(&sizes) {
        if size == 0 {
            continue;
        }
        let n = size as f64;
        *centroid = Point::new(
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
        );
    }
    sizes
}

fn cluster_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }
    sizes
}

// ------------------------------------------------------------
// Full runs
// ------------------------------------------------------------

/// Run k-means, either from explicit `initial` centroids or from an OS-seeded random sample.
pub fn run(
    points: &[Point],
    config: &KMeansConfig,
    initial: Option<Vec<Point>>,
) -> Result<KMeansResult> {
    match initial {
        Some(centroids) => run_from(points, config, centroids),
        None => run_with_rng(points, config, &mut ChaCha8Rng::from_os_rng()),
    }
}

/// Run k-means with centroids sampled from a deterministic seed.
pub fn run_seeded(points: &[Point], config: &KMeansConfig, seed: u64) -> Result<KMeansResult> {
    run_with_rng(points, config, &mut ChaCha8Rng::seed_from_u64(seed))
}

pub fn run_with_rng<R: Rng>(
    points: &[Point],
    config: &KMeansConfig,
    rng: &mut R,
) -> Result<KMeansResult> {
    config.validate()?;
    let centroids = init_centroids(points, config.k, rng);
    run_from(points, config, centroids)
}

/// Lloyd iterations starting from the given centroids.
pub fn run_from(
    points: &[Point],
    config: &KMeansConfig,
    centroids: Vec<Point>,
) -> Result<KMeansResult> {
    config.validate()?;
    if centroids.len() != config.k {
        return Err(SegmentError::InitialCentroidCount {
            expected: config.k,
            actual: centroids.len(),
        });
    }

    if points.is_empty() {
        debug!("no points to cluster");
        return Ok(KMeansResult {
            centroids,
            labels: Vec::new(),
            cluster_sizes: vec![0; config.k],
            iterations: 0,
            converged: true,
        });
    }

    let mut centroids = centroids;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        let labels = assign(points, &centroids);
        let previous = centroids.clone();
        let sizes = update(points, &labels, &mut centroids);
        iterations += 1;
        debug!(iteration = iterations, ?centroids, ?sizes, "updated centroids");

        if config.convergence.is_converged(&previous, &centroids) {
            converged = true;
            break;
        }
    }

    if converged {
        info!(iterations, "k-means converged");
    } else {
        info!(iterations, "k-means stopped at the iteration limit without converging");
    }

    let labels = assign(points, &centroids);
    let cluster_sizes = cluster_sizes(&labels, config.k);
    for (i, _) in cluster_sizes.iter().enumerate().filter(|(_, size)| **size == 0) {
        warn!(cluster = i, centroid = ?centroids[i], "cluster is empty");
    }

    Ok(KMeansResult {
        centroids,
        labels,
        cluster_sizes,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_x_axis(xs: &[f32]) -> Vec<Point> {
        xs.iter().map(|&x| Point::new(x, 0.0, 0.0)).collect()
    }

    fn mean_of(points: &[Point], labels: &[usize], cluster: usize) -> Point {
        let members: Vec<&Point> = points
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l == cluster)
            .map(|(p, _)| p)
            .collect();
        let n = members.len() as f64;
        let sum = members.iter().fold([0.0f64; 3], |acc, p| {
            [acc[0] + p.x as f64, acc[1] + p.y as f64, acc[2] + p.z as f64]
        });
        Point::new((sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32)
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let centroids = on_x_axis(&[0.0, 2.0, 2.0]);
        assert_eq!(nearest(&Point::new(1.0, 0.0, 0.0), &centroids), 0);
        assert_eq!(nearest(&Point::new(3.0, 0.0, 0.0), &centroids), 1);

        let same = vec![Point::new(5.0, 5.0, 5.0); 2];
        assert_eq!(assign(&on_x_axis(&[0.0, 100.0]), &same), vec![0, 0]);
    }

    #[test]
    fn update_sets_means_and_keeps_empty_clusters() {
        let points = on_x_axis(&[1.0, 2.0, 6.0]);
        let labels = vec![0, 0, 0];
        let stale = Point::new(42.0, 42.0, 42.0);
        let mut centroids = vec![Point::default(), stale];

        let sizes = update(&points, &labels, &mut centroids);

        assert_eq!(sizes, vec![3, 0]);
        assert_eq!(centroids[0], mean_of(&points, &labels, 0));
        assert_eq!(centroids[0], Point::new(3.0, 0.0, 0.0));
        assert_eq!(centroids[1], stale);
    }

    #[test]
    fn non_empty_centroids_equal_member_means_after_run() {
        let points: Vec<Point> = (0..50u8)
            .map(|i| Point::from_rgb([i.wrapping_mul(37), i.wrapping_mul(11), 255 - i]))
            .collect();
        let config = KMeansConfig::new(3).with_max_iterations(1);
        let result = run_seeded(&points, &config, 7).unwrap();

        assert_eq!(result.centroids.len(), 3);
        let labels_before = {
            // The single update used the labels from the initial centroids.
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            assign(&points, &init_centroids(&points, 3, &mut rng))
        };
        for cluster in 0..3 {
            if labels_before.contains(&cluster) {
                assert_eq!(result.centroids[cluster], mean_of(&points, &labels_before, cluster));
            }
        }
    }

    #[test]
    fn labeling_is_idempotent() {
        let points: Vec<Point> = (0..=255u8).step_by(5).map(Point::from_gray).collect();
        let centroids = vec![Point::from_gray(40), Point::from_gray(200)];
        assert_eq!(assign(&points, &centroids), assign(&points, &centroids));
    }

    #[test]
    fn fixed_point_runs_until_centroids_stop_moving() {
        let points = on_x_axis(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        let initial = on_x_axis(&[0.0, 1.0]);
        let result = run_from(&points, &KMeansConfig::default(), initial).unwrap();

        assert!(result.converged);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.centroids, on_x_axis(&[1.0, 11.0]));
        assert_eq!(result.labels, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(result.cluster_sizes, vec![3, 3]);
    }

    #[test]
    fn legacy_nan_mode_stops_after_first_iteration() {
        let points = on_x_axis(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        let initial = on_x_axis(&[0.0, 1.0]);
        let config = KMeansConfig::default().with_convergence(Convergence::LegacyNan);
        let result = run_from(&points, &config, initial).unwrap();

        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.centroids[0], Point::new(0.0, 0.0, 0.0));
        assert!((result.centroids[1].x - 7.2).abs() < 1e-5);
        assert_eq!(result.labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn iteration_budget_exhaustion_is_not_an_error() {
        let points = on_x_axis(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        let initial = on_x_axis(&[0.0, 1.0]);
        let config = KMeansConfig::default().with_max_iterations(2);
        let result = run_from(&points, &config, initial).unwrap();

        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.centroids, on_x_axis(&[1.0, 11.0]));
    }

    #[test]
    fn single_point_leaves_one_cluster_empty() {
        let points = vec![Point::from_rgb([10, 20, 30])];
        let initial = vec![Point::from_rgb([10, 20, 30]), Point::from_rgb([200, 200, 200])];
        let result = run_from(&points, &KMeansConfig::default(), initial.clone()).unwrap();

        assert!(result.converged);
        assert_eq!(result.labels, vec![0]);
        assert_eq!(result.cluster_sizes, vec![1, 0]);
        assert_eq!(result.centroids[1], initial[1]);

        // Random start: both picks land on the only point.
        let seeded = run_seeded(&points, &KMeansConfig::default(), 3).unwrap();
        assert_eq!(seeded.centroids, vec![points[0]; 2]);
        assert_eq!(seeded.labels, vec![0]);
    }

    #[test]
    fn empty_input_does_not_crash() {
        let result = run_seeded(&[], &KMeansConfig::default(), 1).unwrap();
        assert_eq!(result.centroids.len(), 2);
        assert!(result.labels.is_empty());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn more_clusters_than_distinct_colors() {
        let points = vec![Point::from_gray(9); 4];
        let result = run_seeded(&points, &KMeansConfig::new(5), 11).unwrap();
        assert_eq!(result.centroids.len(), 5);
        assert!(result.labels.iter().all(|&l| l == 0));
        assert_eq!(result.cluster_sizes.iter().sum::<usize>(), 4);
    }

    #[test]
    fn same_seed_same_result() {
        let points: Vec<Point> = (0..200u32)
            .map(|i| {
                Point::from_rgb([(i * 7 % 256) as u8, (i * 13 % 256) as u8, (i * 29 % 256) as u8])
            })
            .collect();
        let config = KMeansConfig::new(4);
        assert_eq!(
            run_seeded(&points, &config, 99).unwrap(),
            run_seeded(&points, &config, 99).unwrap()
        );
    }

    #[test]
    fn labels_stay_in_range() {
        let points: Vec<Point> = (0..64u8)
            .map(|i| Point::from_rgb([i * 4, 255 - i * 4, i]))
            .collect();
        let result = run_seeded(&points, &KMeansConfig::new(3), 5).unwrap();
        assert_eq!(result.labels.len(), points.len());
        assert!(result.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let points = vec![Point::default()];
        assert!(matches!(
            run_seeded(&points, &KMeansConfig::new(0), 0),
            Err(SegmentError::InvalidClusterCount(0))
        ));
        let bad_epsilon =
            KMeansConfig::default().with_convergence(Convergence::FixedPoint { epsilon: f32::NAN });
        assert!(matches!(bad_epsilon.validate(), Err(SegmentError::InvalidEpsilon(_))));
        assert!(matches!(
            run_from(&points, &KMeansConfig::default(), vec![Point::default()]),
            Err(SegmentError::InitialCentroidCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn nan_centroid_never_counts_as_fixed_point() {
        let before = vec![Point::new(f32::NAN, 0.0, 0.0)];
        let after = before.clone();
        assert!(!Convergence::default().is_converged(&before, &after));
        assert!(!Convergence::LegacyNan.is_converged(&before, &after));
        assert!(Convergence::LegacyNan.is_converged(&[Point::default()], &[Point::from_gray(1)]));
    }
}
