use hashbrown::HashMap;

use crate::geo::{planar_distance, HotspotPoint};

/// Divisive (DIANA) hierarchical clustering over hotspot points.
///
/// Starts with every point in one cluster and repeatedly splits the
/// cluster with the largest internal diameter until no cluster is wider
/// than `threshold`. The distance metric is planar Euclidean on raw
/// lat/lon degrees, matching the rest of the search model.
#[derive(Clone, Copy, Debug)]
pub struct DianaClusterFinder {
    threshold: f64,
}

impl DianaClusterFinder {
    pub fn new(threshold: f64) -> Self {
        debug_assert!(threshold.is_finite() && threshold >= 0.0);
        Self { threshold }
    }

    /// Partitions `points` into clusters keyed by a dense cluster id.
    ///
    /// The output is an exact partition of the input: disjoint, covering,
    /// and with at most `points.len()` clusters. Deterministic for a fixed
    /// input; all ties break on ascending point id.
    pub fn fit(&self, points: &[HotspotPoint]) -> HashMap<usize, Vec<HotspotPoint>> {
        if points.is_empty() {
            return HashMap::new();
        }

        let mut clusters: Vec<Vec<HotspotPoint>> = vec![points.to_vec()];

        loop {
            let Some((widest, diameter)) = Self::widest_cluster(&clusters) else {
                break;
            };
            if diameter <= self.threshold {
                break;
            }

            let cluster = clusters.swap_remove(widest);
            let (remainder, splinter) = Self::split(cluster);
            clusters.push(remainder);
            clusters.push(splinter);
        }

        // Stable output: members ordered by id, clusters keyed in order of
        // their smallest member id.
        for cluster in clusters.iter_mut() {
            cluster.sort_by_key(|p| p.id);
        }
        clusters.sort_by_key(|c| c[0].id);

        clusters.into_iter().enumerate().collect()
    }

    fn widest_cluster(clusters: &[Vec<HotspotPoint>]) -> Option<(usize, f64)> {
        let mut widest: Option<(usize, f64)> = None;
        for (idx, cluster) in clusters.iter().enumerate() {
            let diameter = Self::diameter(cluster);
            match widest {
                Some((_, best)) if diameter <= best => {}
                _ => widest = Some((idx, diameter)),
            }
        }
        widest
    }

    /// Largest pairwise distance within a cluster; 0 for singletons.
    fn diameter(cluster: &[HotspotPoint]) -> f64 {
        let mut max = 0.0_f64;
        for (i, a) in cluster.iter().enumerate() {
            for b in &cluster[i + 1..] {
                max = max.max(planar_distance(a.pos, b.pos));
            }
        }
        max
    }

    /// One DIANA split: the point with maximum average dissimilarity to its
    /// peers seeds the splinter group, then points closer on average to the
    /// splinter group than to the remainder defect to it.
    fn split(cluster: Vec<HotspotPoint>) -> (Vec<HotspotPoint>, Vec<HotspotPoint>) {
        debug_assert!(cluster.len() >= 2);

        let seed_idx = Self::most_dissimilar(&cluster);
        let mut remainder = cluster;
        let seed = remainder.swap_remove(seed_idx);
        let mut splinter = vec![seed];

        while remainder.len() > 1 {
            let mut defector: Option<(usize, f64)> = None;
            for (idx, point) in remainder.iter().enumerate() {
                let to_remainder = Self::average_distance(point, &remainder, Some(idx));
                let to_splinter = Self::average_distance(point, &splinter, None);
                let gain = to_remainder - to_splinter;
                if gain <= 0.0 {
                    continue;
                }
                let better = match defector {
                    None => true,
                    Some((best_idx, best_gain)) => {
                        gain > best_gain
                            || (gain == best_gain && point.id < remainder[best_idx].id)
                    }
                };
                if better {
                    defector = Some((idx, gain));
                }
            }
            let Some((idx, _)) = defector else { break };
            splinter.push(remainder.swap_remove(idx));
        }

        (remainder, splinter)
    }

    fn most_dissimilar(cluster: &[HotspotPoint]) -> usize {
        let mut best = 0;
        let mut best_avg = f64::MIN;
        for (idx, point) in cluster.iter().enumerate() {
            let avg = Self::average_distance(point, cluster, Some(idx));
            if avg > best_avg || (avg == best_avg && point.id < cluster[best].id) {
                best = idx;
                best_avg = avg;
            }
        }
        best
    }

    fn average_distance(point: &HotspotPoint, group: &[HotspotPoint], skip: Option<usize>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (idx, other) in group.iter().enumerate() {
            if Some(idx) == skip {
                continue;
            }
            sum += planar_distance(point.pos, other.pos);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn hotspots(coords: &[(f64, f64)]) -> Vec<HotspotPoint> {
        coords
            .iter()
            .enumerate()
            .map(|(id, &(lat, lon))| HotspotPoint::new(id as u32, GeoPoint::new(lat, lon)))
            .collect()
    }

    fn two_groups_of_five() -> Vec<HotspotPoint> {
        hotspots(&[
            (1.3400, 103.9600),
            (1.3401, 103.9601),
            (1.3402, 103.9600),
            (1.3400, 103.9602),
            (1.3401, 103.9603),
            (2.3400, 104.9600),
            (2.3401, 104.9601),
            (2.3402, 104.9600),
            (2.3400, 104.9602),
            (2.3401, 104.9603),
        ])
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let finder = DianaClusterFinder::new(0.1);
        assert!(finder.fit(&[]).is_empty());
    }

    #[test]
    fn singleton_input_is_one_cluster() {
        let finder = DianaClusterFinder::new(0.1);
        let points = hotspots(&[(1.0, 2.0)]);
        let clusters = finder.fit(&points);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[&0], points);
    }

    #[test]
    fn output_partitions_the_input() {
        let finder = DianaClusterFinder::new(0.05);
        let points = hotspots(&[
            (1.0, 1.0),
            (1.01, 1.0),
            (1.5, 1.5),
            (1.51, 1.52),
            (2.0, 2.0),
            (1.0, 1.005),
            (2.001, 2.001),
        ]);
        let clusters = finder.fit(&points);

        let mut seen: Vec<u32> = clusters
            .values()
            .flat_map(|c| c.iter().map(|p| p.id))
            .collect();
        seen.sort_unstable();
        let expected: Vec<u32> = (0..points.len() as u32).collect();
        assert_eq!(seen, expected, "clusters must be disjoint and covering");
        assert!(clusters.len() <= points.len());
    }

    #[test]
    fn two_well_separated_groups_split_in_two() {
        let finder = DianaClusterFinder::new(0.1);
        let clusters = finder.fit(&two_groups_of_five());

        assert_eq!(clusters.len(), 2);
        for members in clusters.values() {
            assert_eq!(members.len(), 5);
        }
        // Group membership must not mix: ids 0..5 together, 5..10 together.
        for members in clusters.values() {
            let below = members.iter().filter(|p| p.id < 5).count();
            assert!(below == 0 || below == 5);
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let finder = DianaClusterFinder::new(0.1);
        let points = two_groups_of_five();
        let a = finder.fit(&points);
        let b = finder.fit(&points);
        assert_eq!(a.len(), b.len());
        for (id, members) in &a {
            assert_eq!(&b[id], members);
        }
    }

    #[test]
    fn tight_cluster_is_never_split() {
        let finder = DianaClusterFinder::new(1.0);
        let points = hotspots(&[(1.0, 1.0), (1.001, 1.001), (1.002, 1.0)]);
        let clusters = finder.fit(&points);
        assert_eq!(clusters.len(), 1);
    }
}
