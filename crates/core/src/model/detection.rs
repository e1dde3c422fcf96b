use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::violation::ViolationEvent;
use crate::policy::ProctorPolicy;

//
// ─── RAW CAPABILITY PAYLOADS ───────────────────────────────────────────────────
//

/// Bounding box as reported by the face locator, in relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawBox {
    pub x_min: f32,
    pub y_min: f32,
    pub width: f32,
    pub height: f32,
}

/// One face as reported by the external face locator. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFaceDetection {
    pub score: Option<f32>,
    pub bounding_box: Option<RawBox>,
}

/// One prediction as reported by the external object classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub class: String,
    pub score: f32,
}

//
// ─── NORMALIZED RESULT ─────────────────────────────────────────────────────────
//

/// Face rectangle clamped into the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    /// Normalizes a raw box. Returns `None` for non-finite or empty boxes.
    #[must_use]
    pub fn from_raw(raw: RawBox) -> Option<Self> {
        let values = [raw.x_min, raw.y_min, raw.width, raw.height];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let x = raw.x_min.clamp(0.0, 1.0);
        let y = raw.y_min.clamp(0.0, 1.0);
        let width = raw.width.clamp(0.0, 1.0 - x);
        let height = raw.height.clamp(0.0, 1.0 - y);
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class: String,
    pub confidence: f32,
}

/// Indicator state for the monitor widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Loading,
    Clear,
    Attention,
}

/// Incremental output of one detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PerceptionUpdate {
    Faces { count: u32, boxes: Vec<FaceBox> },
    Objects(Vec<DetectedObject>),
}

impl PerceptionUpdate {
    /// Normalizes raw face detections: drops low-confidence faces and keeps the
    /// boxes that survive validation.
    #[must_use]
    pub fn from_faces(raw: &[RawFaceDetection], policy: &ProctorPolicy) -> Self {
        let kept: Vec<&RawFaceDetection> = raw
            .iter()
            .filter(|d| {
                d.score
                    .is_none_or(|s| s.is_finite() && s >= policy.min_face_confidence())
            })
            .collect();
        let boxes = kept
            .iter()
            .filter_map(|d| d.bounding_box.and_then(FaceBox::from_raw))
            .collect();
        let count = u32::try_from(kept.len()).unwrap_or(u32::MAX);
        PerceptionUpdate::Faces { count, boxes }
    }

    /// Keeps only predictions on the denylist. `person` is never kept.
    #[must_use]
    pub fn from_predictions(raw: &[RawPrediction], policy: &ProctorPolicy) -> Self {
        let objects = raw
            .iter()
            .filter(|p| p.score.is_finite() && policy.is_prohibited(&p.class))
            .map(|p| DetectedObject {
                class: p.class.trim().to_lowercase(),
                confidence: p.score.clamp(0.0, 1.0),
            })
            .collect();
        PerceptionUpdate::Objects(objects)
    }

    /// Violation implied by this update, if any. Nothing is derived before the
    /// detector is ready.
    #[must_use]
    pub fn violation(&self, ready: bool, at: DateTime<Utc>) -> Option<ViolationEvent> {
        if !ready {
            return None;
        }
        match self {
            PerceptionUpdate::Faces { count: 0, .. } => Some(ViolationEvent::no_face(at)),
            PerceptionUpdate::Faces { count, .. } if *count > 1 => {
                Some(ViolationEvent::multi_face(*count, at))
            }
            PerceptionUpdate::Faces { .. } => None,
            PerceptionUpdate::Objects(objects) if !objects.is_empty() => {
                Some(ViolationEvent::prohibited_objects(
                    objects.iter().map(|o| o.class.clone()).collect(),
                    at,
                ))
            }
            PerceptionUpdate::Objects(_) => None,
        }
    }
}

/// Continuously updated detector output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub face_count: u32,
    pub face_boxes: Vec<FaceBox>,
    pub prohibited_objects: Vec<DetectedObject>,
    pub ready: bool,
}

impl DetectionResult {
    /// Result before the capabilities have warmed up.
    #[must_use]
    pub fn loading() -> Self {
        Self::default()
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn apply(&mut self, update: &PerceptionUpdate) {
        match update {
            PerceptionUpdate::Faces { count, boxes } => {
                self.face_count = *count;
                self.face_boxes.clone_from(boxes);
            }
            PerceptionUpdate::Objects(objects) => {
                self.prohibited_objects.clone_from(objects);
            }
        }
    }

    /// Camera-setup gate: ready, exactly one face, nothing prohibited in view.
    #[must_use]
    pub fn is_ready_for_exam(&self) -> bool {
        self.ready && self.face_count == 1 && self.prohibited_objects.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        if !self.ready {
            MonitorStatus::Loading
        } else if self.is_ready_for_exam() {
            MonitorStatus::Clear
        } else {
            MonitorStatus::Attention
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::violation::{ViolationKind, ViolationPayload};
    use crate::time::fixed_now;

    fn face(score: f32) -> RawFaceDetection {
        RawFaceDetection {
            score: Some(score),
            bounding_box: Some(RawBox {
                x_min: 0.25,
                y_min: 0.2,
                width: 0.5,
                height: 0.6,
            }),
        }
    }

    fn prediction(class: &str, score: f32) -> RawPrediction {
        RawPrediction {
            class: class.to_string(),
            score,
        }
    }

    #[test]
    fn low_confidence_faces_are_dropped() {
        let policy = ProctorPolicy::default();
        let update = PerceptionUpdate::from_faces(&[face(0.9), face(0.2)], &policy);
        match update {
            PerceptionUpdate::Faces { count, boxes } => {
                assert_eq!(count, 1);
                assert_eq!(boxes.len(), 1);
            }
            PerceptionUpdate::Objects(_) => panic!("expected faces"),
        }
    }

    #[test]
    fn faces_without_boxes_still_count() {
        let policy = ProctorPolicy::default();
        let raw = RawFaceDetection {
            score: None,
            bounding_box: None,
        };
        let update = PerceptionUpdate::from_faces(&[raw, face(0.8)], &policy);
        assert_eq!(
            update,
            PerceptionUpdate::Faces {
                count: 2,
                boxes: vec![FaceBox {
                    x: 0.25,
                    y: 0.2,
                    width: 0.5,
                    height: 0.6
                }],
            }
        );
    }

    #[test]
    fn boxes_are_clamped_into_unit_square() {
        let b = FaceBox::from_raw(RawBox {
            x_min: -0.1,
            y_min: 0.5,
            width: 0.4,
            height: 0.9,
        })
        .unwrap();
        assert!((b.x - 0.0).abs() < f32::EPSILON);
        assert!((b.height - 0.5).abs() < f32::EPSILON);
        assert!(
            FaceBox::from_raw(RawBox {
                x_min: f32::NAN,
                ..RawBox::default()
            })
            .is_none()
        );
    }

    #[test]
    fn person_is_never_a_prohibited_object() {
        let policy = ProctorPolicy::default();
        let update = PerceptionUpdate::from_predictions(
            &[
                prediction("person", 0.99),
                prediction("Cell Phone", 0.7),
                prediction("cup", 0.9),
            ],
            &policy,
        );
        assert_eq!(
            update,
            PerceptionUpdate::Objects(vec![DetectedObject {
                class: "cell phone".to_string(),
                confidence: 0.7,
            }])
        );
    }

    #[test]
    fn no_violation_before_ready() {
        let empty = PerceptionUpdate::Faces {
            count: 0,
            boxes: Vec::new(),
        };
        assert!(empty.violation(false, fixed_now()).is_none());
        let event = empty.violation(true, fixed_now()).unwrap();
        assert_eq!(event.kind, ViolationKind::NoFace);
    }

    #[test]
    fn multi_face_and_object_violations_carry_payload() {
        let crowd = PerceptionUpdate::Faces {
            count: 3,
            boxes: Vec::new(),
        };
        let event = crowd.violation(true, fixed_now()).unwrap();
        assert_eq!(event.payload, ViolationPayload::FaceCount(3));

        let single = PerceptionUpdate::Faces {
            count: 1,
            boxes: Vec::new(),
        };
        assert!(single.violation(true, fixed_now()).is_none());

        let objects = PerceptionUpdate::Objects(vec![DetectedObject {
            class: "book".into(),
            confidence: 0.6,
        }]);
        let event = objects.violation(true, fixed_now()).unwrap();
        assert_eq!(event.payload, ViolationPayload::Objects(vec!["book".into()]));
        assert!(
            PerceptionUpdate::Objects(Vec::new())
                .violation(true, fixed_now())
                .is_none()
        );
    }

    #[test]
    fn status_tracks_readiness_and_anomalies() {
        let mut result = DetectionResult::loading();
        assert_eq!(result.status(), MonitorStatus::Loading);

        result.mark_ready();
        result.apply(&PerceptionUpdate::Faces {
            count: 1,
            boxes: Vec::new(),
        });
        assert_eq!(result.status(), MonitorStatus::Clear);
        assert!(result.is_ready_for_exam());

        result.apply(&PerceptionUpdate::Objects(vec![DetectedObject {
            class: "laptop".into(),
            confidence: 0.8,
        }]));
        assert_eq!(result.status(), MonitorStatus::Attention);
        assert_eq!(result.face_count, 1);
    }
}
