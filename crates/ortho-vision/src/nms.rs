use crate::Detection;

/// IoU for top-left x/y/w/h boxes.
pub fn iou(x1: f32, y1: f32, w1: f32, h1: f32, x2: f32, y2: f32, w2: f32, h2: f32) -> f32 {
    let ix_a = x1.max(x2);
    let iy_a = y1.max(y2);
    let ix_b = (x1 + w1).min(x2 + w2);
    let iy_b = (y1 + h1).min(y2 + h2);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let a1 = w1.max(0.0) * h1.max(0.0);
    let a2 = w2.max(0.0) * h2.max(0.0);
    let union = a1 + a2 - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy merge of per-tile detections back into one image-space list.
/// Highest confidence wins; overlapping duplicates from adjacent tiles are
/// suppressed class-agnostically.
pub fn merge_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if iou(d.x, d.y, d.w, d.h, k.x, k.y, k.w, k.h) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_det { break; }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { class_id: 0, class_name: "obj".into(), conf, x, y, w, h }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        assert!((iou(10.0, 10.0, 20.0, 20.0, 10.0, 10.0, 20.0, 20.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(0.0, 0.0, 10.0, 10.0, 50.0, 50.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn merge_suppresses_tile_duplicates() {
        // the same object seen from two overlapping tiles, slightly shifted
        let dets = vec![
            det(100.0, 100.0, 40.0, 40.0, 0.9),
            det(102.0, 101.0, 40.0, 40.0, 0.8),
            det(300.0, 300.0, 30.0, 30.0, 0.7),
        ];
        let kept = merge_filter(dets, 0.5, 10);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].conf - 0.9).abs() < 1e-6);
        assert!((kept[1].conf - 0.7).abs() < 1e-6);
    }

    #[test]
    fn merge_caps_at_max_detections() {
        let dets = (0..5)
            .map(|i| det(i as f32 * 100.0, 0.0, 10.0, 10.0, 0.5))
            .collect();
        assert_eq!(merge_filter(dets, 0.5, 3).len(), 3);
    }
}
