//! Perceptual detector: camera frames in, normalized perception updates out.
//!
//! Two independent cadences share one capture stream. Face location runs on the
//! frame interval and object classification on the slower object interval.
//! Models are warmed up before the loops start; a warm-up failure keeps the
//! session from starting. A failed cycle is skipped and the next one retries.

use std::sync::Arc;

use proctor_core::model::PerceptionUpdate;
use proctor_core::policy::ProctorPolicy;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::capabilities::{CaptureDevice, CaptureHandle, FaceLocator, ObjectClassifier};
use crate::error::CapabilityError;

/// Which of the two detection loops run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorFlags {
    pub faces: bool,
    pub objects: bool,
}

impl Default for DetectorFlags {
    fn default() -> Self {
        Self {
            faces: true,
            objects: true,
        }
    }
}

pub struct PerceptualDetector {
    capture: Arc<dyn CaptureDevice>,
    faces: Arc<dyn FaceLocator>,
    objects: Arc<dyn ObjectClassifier>,
    policy: ProctorPolicy,
    flags: DetectorFlags,
}

impl PerceptualDetector {
    #[must_use]
    pub fn new(
        capture: Arc<dyn CaptureDevice>,
        faces: Arc<dyn FaceLocator>,
        objects: Arc<dyn ObjectClassifier>,
        policy: ProctorPolicy,
    ) -> Self {
        Self {
            capture,
            faces,
            objects,
            policy,
            flags: DetectorFlags::default(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: DetectorFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn flags(&self) -> DetectorFlags {
        self.flags
    }

    /// Loads the models of the enabled loops.
    ///
    /// # Errors
    ///
    /// Returns the first `CapabilityError` raised by either model.
    pub async fn warm_up(&self) -> Result<(), CapabilityError> {
        if self.flags.faces {
            self.faces.warm_up().await?;
        }
        if self.flags.objects {
            self.objects.warm_up().await?;
        }
        Ok(())
    }

    /// One face cycle. `Ok(None)` when the stream has no frame yet.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError` if the frame cannot be read or processed.
    pub async fn detect_faces(
        &self,
        handle: CaptureHandle,
    ) -> Result<Option<PerceptionUpdate>, CapabilityError> {
        let Some(frame) = self.capture.frame(handle).await? else {
            return Ok(None);
        };
        let raw = self.faces.locate(&frame).await?;
        Ok(Some(PerceptionUpdate::from_faces(&raw, &self.policy)))
    }

    /// One object cycle. `Ok(None)` when the stream has no frame yet.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError` if the frame cannot be read or processed.
    pub async fn detect_objects(
        &self,
        handle: CaptureHandle,
    ) -> Result<Option<PerceptionUpdate>, CapabilityError> {
        let Some(frame) = self.capture.frame(handle).await? else {
            return Ok(None);
        };
        let raw = self.objects.classify(&frame).await?;
        Ok(Some(PerceptionUpdate::from_predictions(&raw, &self.policy)))
    }

    /// Runs the enabled loops until `emit` returns false. Expects `warm_up` to
    /// have succeeded.
    pub async fn run<F>(&self, handle: CaptureHandle, emit: F)
    where
        F: Fn(PerceptionUpdate) -> bool + Send + Sync,
    {
        info!("[detector] loops running");
        match (self.flags.faces, self.flags.objects) {
            (true, true) => {
                tokio::join!(self.face_loop(handle, &emit), self.object_loop(handle, &emit));
            }
            (true, false) => self.face_loop(handle, &emit).await,
            (false, true) => self.object_loop(handle, &emit).await,
            (false, false) => {}
        }
    }

    async fn face_loop<F>(&self, handle: CaptureHandle, emit: &F)
    where
        F: Fn(PerceptionUpdate) -> bool + Send + Sync,
    {
        let period = self.policy.timings().face_frame_interval;
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.detect_faces(handle).await {
                Ok(Some(update)) => {
                    if !emit(update) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("[detector] face cycle skipped: {err}"),
            }
        }
    }

    async fn object_loop<F>(&self, handle: CaptureHandle, emit: &F)
    where
        F: Fn(PerceptionUpdate) -> bool + Send + Sync,
    {
        let period = self.policy.timings().object_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.detect_objects(handle).await {
                Ok(Some(update)) => {
                    if !emit(update) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("[detector] object cycle skipped: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CaptureConstraints, Frame};
    use async_trait::async_trait;
    use proctor_core::model::{RawBox, RawFaceDetection, RawPrediction};
    use std::sync::Mutex;

    struct OneFrame;

    #[async_trait]
    impl CaptureDevice for OneFrame {
        async fn open(&self, _: CaptureConstraints) -> Result<CaptureHandle, CapabilityError> {
            Ok(CaptureHandle::new(1))
        }
        async fn frame(&self, handle: CaptureHandle) -> Result<Option<Frame>, CapabilityError> {
            if handle.value() == 1 {
                Ok(Some(Frame {
                    sequence: 0,
                    width: 2,
                    height: 2,
                    pixels: Arc::from(vec![0u8; 4]),
                }))
            } else {
                Ok(None)
            }
        }
        async fn close(&self, _: CaptureHandle) {}
    }

    struct TwoFaces;

    #[async_trait]
    impl FaceLocator for TwoFaces {
        async fn warm_up(&self) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn locate(&self, _: &Frame) -> Result<Vec<RawFaceDetection>, CapabilityError> {
            let face = RawFaceDetection {
                score: Some(0.9),
                bounding_box: Some(RawBox {
                    x_min: 0.1,
                    y_min: 0.1,
                    width: 0.2,
                    height: 0.2,
                }),
            };
            Ok(vec![face.clone(), face])
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl ObjectClassifier for BrokenClassifier {
        async fn warm_up(&self) -> Result<(), CapabilityError> {
            Err(CapabilityError::Unavailable {
                capability: "object classifier",
                reason: "model missing".into(),
            })
        }
        async fn classify(&self, _: &Frame) -> Result<Vec<RawPrediction>, CapabilityError> {
            Ok(Vec::new())
        }
    }

    fn detector() -> PerceptualDetector {
        PerceptualDetector::new(
            Arc::new(OneFrame),
            Arc::new(TwoFaces),
            Arc::new(BrokenClassifier),
            ProctorPolicy::default(),
        )
    }

    #[tokio::test]
    async fn face_cycle_normalizes_detections() {
        let update = detector()
            .detect_faces(CaptureHandle::new(1))
            .await
            .unwrap()
            .expect("frame available");
        assert!(matches!(update, PerceptionUpdate::Faces { count: 2, .. }));

        let empty = detector().detect_faces(CaptureHandle::new(2)).await.unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn warm_up_surfaces_the_failing_model() {
        let err = detector().warm_up().await.unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Unavailable {
                capability: "object classifier",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn disabled_object_loop_skips_its_model() {
        let detector = detector().with_flags(DetectorFlags {
            faces: true,
            objects: false,
        });
        detector.warm_up().await.unwrap();

        let seen = Mutex::new(Vec::new());
        detector
            .run(CaptureHandle::new(1), |update| {
                let mut seen = seen.lock().unwrap();
                seen.push(update);
                seen.len() < 2
            })
            .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen
            .iter()
            .all(|u| matches!(u, PerceptionUpdate::Faces { count: 2, .. })));
    }
}
