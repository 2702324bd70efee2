use ortho_proto::{DetectionRecord, ImageOutcome};
use ortho_vision::Detection;

/// Wire form of a single detection. Pixel coordinates are truncated to
/// whole pixels; confidence is clamped into [0, 1].
pub fn record_from(det: &Detection) -> DetectionRecord {
    DetectionRecord {
        category: det.class_name.clone(),
        bbox: [
            det.x.max(0.0) as u32,
            det.y.max(0.0) as u32,
            det.w.max(0.0) as u32,
            det.h.max(0.0) as u32,
        ],
        confidence: det.conf.clamp(0.0, 1.0),
        verified: None,
    }
}

pub fn format_outcome(image_path: &str, detections: &[Detection]) -> ImageOutcome {
    ImageOutcome::success(image_path, detections.iter().map(record_from).collect())
}

/// Inverse of [`record_from`], for re-drawing detections at export time.
/// Class id is lost on the wire and not needed for rendering.
pub fn detection_from_record(rec: &DetectionRecord) -> Detection {
    Detection {
        class_id: 0,
        class_name: rec.category.clone(),
        conf: rec.confidence,
        x: rec.bbox[0] as f32,
        y: rec.bbox[1] as f32,
        w: rec.bbox[2] as f32,
        h: rec.bbox[3] as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(name: &str, conf: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection { class_id: 0, class_name: name.into(), conf, x, y, w, h }
    }

    #[test]
    fn record_truncates_and_clamps() {
        let rec = record_from(&det("vehicle", 1.2, -3.9, 10.7, 20.1, 8.0));
        assert_eq!(rec.category, "vehicle");
        assert_eq!(rec.bbox, [0, 10, 20, 8]);
        assert_eq!(rec.confidence, 1.0);
        assert!(rec.verified.is_none());
    }

    #[test]
    fn outcome_carries_all_records_in_order() {
        let dets = vec![det("a", 0.9, 1.0, 2.0, 3.0, 4.0), det("b", 0.4, 5.0, 6.0, 7.0, 8.0)];
        let out = format_outcome("/tmp/x.jpg", &dets);
        assert!(out.is_success());
        let recs = out.detections.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].category, "a");
        assert_eq!(recs[1].bbox, [5, 6, 7, 8]);
    }

    #[test]
    fn record_survives_wire_round_trip_for_rendering() {
        let rec = record_from(&det("building", 0.83, 12.0, 34.0, 56.0, 78.0));
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"type\":\"building\""));
        let back: DetectionRecord = serde_json::from_str(&json).unwrap();
        let d = detection_from_record(&back);
        assert_eq!(d.class_name, "building");
        assert_eq!(d.x, 12.0);
        assert_eq!(d.h, 78.0);
    }
}
