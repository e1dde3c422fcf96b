use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── KIND ──────────────────────────────────────────────────────────────────────
//

/// Where a violation came from. Drives how the ledger counts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationSource {
    /// Camera-based anomaly (face or object detection).
    Perceptual,
    /// Tab visibility or fullscreen anomaly.
    Integrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    NoFace,
    MultiFace,
    ProhibitedObject,
    TabHidden,
    FullscreenExited,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 5] = [
        ViolationKind::NoFace,
        ViolationKind::MultiFace,
        ViolationKind::ProhibitedObject,
        ViolationKind::TabHidden,
        ViolationKind::FullscreenExited,
    ];

    #[must_use]
    pub fn source(self) -> ViolationSource {
        match self {
            ViolationKind::NoFace | ViolationKind::MultiFace | ViolationKind::ProhibitedObject => {
                ViolationSource::Perceptual
            }
            ViolationKind::TabHidden | ViolationKind::FullscreenExited => {
                ViolationSource::Integrity
            }
        }
    }

    /// Stable wire/storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::NoFace => "no-face",
            ViolationKind::MultiFace => "multi-face",
            ViolationKind::ProhibitedObject => "prohibited-object",
            ViolationKind::TabHidden => "tab-hidden",
            ViolationKind::FullscreenExited => "fullscreen-exited",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown violation kind: {0}")]
pub struct UnknownViolationKind(pub String);

impl FromStr for ViolationKind {
    type Err = UnknownViolationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViolationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownViolationKind(s.to_string()))
    }
}

//
// ─── EVENT ─────────────────────────────────────────────────────────────────────
//

/// Optional detail attached to a violation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ViolationPayload {
    #[default]
    None,
    FaceCount(u32),
    Objects(Vec<String>),
}

/// A single timestamped violation. Append-only once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: ViolationPayload,
}

impl ViolationEvent {
    #[must_use]
    pub fn new(kind: ViolationKind, occurred_at: DateTime<Utc>, payload: ViolationPayload) -> Self {
        Self {
            kind,
            occurred_at,
            payload,
        }
    }

    #[must_use]
    pub fn no_face(at: DateTime<Utc>) -> Self {
        Self::new(ViolationKind::NoFace, at, ViolationPayload::FaceCount(0))
    }

    #[must_use]
    pub fn multi_face(count: u32, at: DateTime<Utc>) -> Self {
        Self::new(ViolationKind::MultiFace, at, ViolationPayload::FaceCount(count))
    }

    #[must_use]
    pub fn prohibited_objects(classes: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(
            ViolationKind::ProhibitedObject,
            at,
            ViolationPayload::Objects(classes),
        )
    }

    #[must_use]
    pub fn tab_hidden(at: DateTime<Utc>) -> Self {
        Self::new(ViolationKind::TabHidden, at, ViolationPayload::None)
    }

    #[must_use]
    pub fn fullscreen_exited(at: DateTime<Utc>) -> Self {
        Self::new(ViolationKind::FullscreenExited, at, ViolationPayload::None)
    }

    #[must_use]
    pub fn source(&self) -> ViolationSource {
        self.kind.source()
    }

    /// Human readable message for warning banners.
    #[must_use]
    pub fn detail(&self) -> String {
        match (&self.kind, &self.payload) {
            (ViolationKind::NoFace, _) => "No face detected".to_string(),
            (ViolationKind::MultiFace, ViolationPayload::FaceCount(n)) => {
                format!("Multiple faces detected ({n})")
            }
            (ViolationKind::MultiFace, _) => "Multiple faces detected".to_string(),
            (ViolationKind::ProhibitedObject, ViolationPayload::Objects(classes)) => {
                format!("Not allowed device detected: {}", classes.join(", "))
            }
            (ViolationKind::ProhibitedObject, _) => "Not allowed device detected".to_string(),
            (ViolationKind::TabHidden, _) => "Tab switch detected".to_string(),
            (ViolationKind::FullscreenExited, _) => "Fullscreen exited".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn kinds_map_to_sources() {
        assert_eq!(ViolationKind::NoFace.source(), ViolationSource::Perceptual);
        assert_eq!(
            ViolationKind::ProhibitedObject.source(),
            ViolationSource::Perceptual
        );
        assert_eq!(ViolationKind::TabHidden.source(), ViolationSource::Integrity);
        assert_eq!(
            ViolationKind::FullscreenExited.source(),
            ViolationSource::Integrity
        );
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in ViolationKind::ALL {
            assert_eq!(kind.as_str().parse::<ViolationKind>().unwrap(), kind);
        }
        assert!("device-detected".parse::<ViolationKind>().is_err());
    }

    #[test]
    fn detail_lists_object_classes() {
        let event = ViolationEvent::prohibited_objects(
            vec!["cell phone".into(), "book".into()],
            fixed_now(),
        );
        assert_eq!(
            event.detail(),
            "Not allowed device detected: cell phone, book"
        );
    }

    #[test]
    fn payload_serializes_tagged() {
        let json = serde_json::to_string(&ViolationPayload::FaceCount(2)).unwrap();
        assert_eq!(json, r#"{"type":"face_count","value":2}"#);
        let back: ViolationPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ViolationPayload::FaceCount(2));
    }
}
