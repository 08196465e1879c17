//! Merging of overlapping detections

use crate::detect::Detection;

/// Intersection over union of two square windows
///
/// Windows are centred on (`row`, `col`) with side `scale`. Returns a value
/// in [0, 1]; degenerate windows have no overlap.
#[must_use]
pub fn iou(a: &Detection, b: &Detection) -> f64 {
    let (r1, c1, s1) = (f64::from(a.row), f64::from(a.col), f64::from(a.scale));
    let (r2, c2, s2) = (f64::from(b.row), f64::from(b.col), f64::from(b.scale));

    let overlap = |p1: f64, p2: f64| {
        ((p1 + s1 / 2.0).min(p2 + s2 / 2.0) - (p1 - s1 / 2.0).max(p2 - s2 / 2.0)).max(0.0)
    };
    let intersection = overlap(r1, r2) * overlap(c1, c2);
    let union = s1 * s1 + s2 * s2 - intersection;

    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Merge detections whose windows overlap by at least `iou_threshold`
///
/// Detections are visited by descending score, ties in input order. Each
/// unassigned detection seeds a cluster and absorbs every unassigned
/// detection overlapping it. The cluster keeps the seed's window and the
/// summed score of its members. Clusters come out by descending score.
///
/// Representatives overlap each other by less than the threshold, so
/// clustering the output again returns it unchanged.
#[must_use]
pub fn cluster_detections(detections: &[Detection], iou_threshold: f64) -> Vec<Detection> {
    let mut order: Vec<&Detection> = detections.iter().collect();
    order.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut assigned = vec![false; order.len()];
    let mut clusters = Vec::new();

    for i in 0..order.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let seed = order[i];
        let mut score = seed.score;

        for j in i + 1..order.len() {
            if !assigned[j] && iou(seed, order[j]) >= iou_threshold {
                assigned[j] = true;
                score += order[j].score;
            }
        }

        clusters.push(Detection { score, ..*seed });
    }

    clusters.sort_by(|a, b| b.score.total_cmp(&a.score));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(row: i32, col: i32, scale: i32, score: f32) -> Detection {
        Detection {
            row,
            col,
            scale,
            score,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = det(50, 50, 20, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_iou_disjoint() {
        assert!(iou(&det(10, 10, 10, 1.0), &det(100, 100, 10, 1.0)).abs() < 1e-12);
        // Touching edges do not overlap
        assert!(iou(&det(10, 10, 10, 1.0), &det(10, 20, 10, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_iou_half_shift() {
        // Overlap 10x5 = 50, union 100 + 100 - 50 = 150
        let value = iou(&det(0, 0, 10, 1.0), &det(0, 5, 10, 1.0));
        assert!((value - 50.0 / 150.0).abs() < 1e-12);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = det(12, 40, 30, 1.0);
        let b = det(20, 31, 24, 1.0);
        assert!((iou(&a, &b) - iou(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_iou_degenerate_windows() {
        assert!(iou(&det(0, 0, 0, 1.0), &det(0, 0, 0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_detections(&[], 0.2).is_empty());
    }

    #[test]
    fn test_overlapping_merge_into_seed() {
        let detections = vec![
            det(50, 50, 20, 1.0),
            det(51, 52, 20, 3.0),
            det(49, 50, 22, 2.0),
            det(200, 200, 20, 0.5),
        ];
        let clusters = cluster_detections(&detections, 0.2);

        assert_eq!(clusters.len(), 2);
        assert_eq!((clusters[0].row, clusters[0].col, clusters[0].scale), (51, 52, 20));
        assert!((clusters[0].score - 6.0).abs() < 1e-6);
        assert_eq!((clusters[1].row, clusters[1].col), (200, 200));
        assert!((clusters[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let detections = vec![det(10, 10, 10, 1.0), det(10, 12, 10, 1.0)];
        let clusters = cluster_detections(&detections, 0.2);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].col, 10);
    }

    #[test]
    fn test_threshold_one_keeps_distinct_windows() {
        let detections = vec![det(10, 10, 10, 1.0), det(10, 12, 10, 1.0), det(10, 10, 10, 1.0)];
        let clusters = cluster_detections(&detections, 1.0);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let detections: Vec<Detection> = (0..30)
            .map(|i| det(40 + (i % 7) * 3, 60 + (i % 5) * 4, 20 + (i % 3) * 2, (i % 4) as f32 + 0.5))
            .collect();
        let once = cluster_detections(&detections, 0.2);
        let twice = cluster_detections(&once, 0.2);
        assert_eq!(once, twice);
        assert!(once.len() <= detections.len());
    }
}
