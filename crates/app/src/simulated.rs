//! Simulated capabilities and a scripted candidate for headless runs.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proctor_core::model::{RawBox, RawFaceDetection, RawPrediction};
use proctor_core::progression::ProgressionState;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use services::capabilities::{
    CaptureConstraints, CaptureDevice, CaptureHandle, DisplayController, FaceLocator, Frame,
    ObjectClassifier,
};
use services::error::{CapabilityError, DisplayError};
use services::{SessionError, SessionHandle};
use tracing::{debug, info};

/// A camera that produces blank frames of the requested size.
#[derive(Default)]
pub struct SimulatedCamera {
    sequence: AtomicU64,
    stream: Mutex<Option<Frame>>,
}

#[async_trait]
impl CaptureDevice for SimulatedCamera {
    async fn open(&self, constraints: CaptureConstraints) -> Result<CaptureHandle, CapabilityError> {
        let pixels = (constraints.width as usize) * (constraints.height as usize);
        let mut stream = self.stream.lock().map_err(|_| CapabilityError::Unavailable {
            capability: "camera",
            reason: "stream lock poisoned".into(),
        })?;
        *stream = Some(Frame {
            sequence: 0,
            width: constraints.width,
            height: constraints.height,
            pixels: Arc::from(vec![0u8; pixels]),
        });
        Ok(CaptureHandle::new(1))
    }

    async fn frame(&self, _: CaptureHandle) -> Result<Option<Frame>, CapabilityError> {
        let template = self
            .stream
            .lock()
            .map_err(|_| CapabilityError::Failed {
                capability: "camera",
                reason: "stream lock poisoned".into(),
            })?
            .clone();
        Ok(template.map(|mut frame| {
            frame.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            frame
        }))
    }

    async fn close(&self, _: CaptureHandle) {
        if let Ok(mut stream) = self.stream.lock() {
            *stream = None;
        }
    }
}

/// Always sees the candidate, except while they are marked as away.
#[derive(Default)]
pub struct SimulatedFaceLocator {
    away: AtomicBool,
}

impl SimulatedFaceLocator {
    pub fn set_away(&self, away: bool) {
        self.away.store(away, Ordering::SeqCst);
    }
}

#[async_trait]
impl FaceLocator for SimulatedFaceLocator {
    async fn warm_up(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn locate(&self, _: &Frame) -> Result<Vec<RawFaceDetection>, CapabilityError> {
        if self.away.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(vec![RawFaceDetection {
            score: Some(0.93),
            bounding_box: Some(RawBox {
                x_min: 0.35,
                y_min: 0.25,
                width: 0.3,
                height: 0.4,
            }),
        }])
    }
}

/// Sees the candidate and nothing else.
pub struct SimulatedClassifier;

#[async_trait]
impl ObjectClassifier for SimulatedClassifier {
    async fn warm_up(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn classify(&self, _: &Frame) -> Result<Vec<RawPrediction>, CapabilityError> {
        Ok(vec![RawPrediction {
            class: "person".into(),
            score: 0.97,
        }])
    }
}

/// Grants every fullscreen request.
#[derive(Default)]
pub struct SimulatedDisplay {
    fullscreen: AtomicBool,
}

impl SimulatedDisplay {
    pub fn exit_fullscreen(&self) {
        self.fullscreen.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DisplayController for SimulatedDisplay {
    async fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    async fn request_fullscreen(&self) -> Result<(), DisplayError> {
        self.fullscreen.store(true, Ordering::SeqCst);
        Ok(())
    }
}

//
// ─── SCRIPTED CANDIDATE ────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy)]
pub struct CandidateScript {
    pub think_time: Duration,
    /// Number of questions on which the candidate leaves the tab once.
    pub tab_switches: u32,
    pub seed: u64,
}

/// Answers every question with a random option and confirms each move, leaving
/// the tab on the first `tab_switches` questions. Returns once the session is
/// submitted.
///
/// # Errors
///
/// Returns `SessionError::Closed` if the session stops underneath the script.
pub async fn run_candidate(
    handle: SessionHandle,
    faces: Arc<SimulatedFaceLocator>,
    display: Arc<SimulatedDisplay>,
    script: CandidateScript,
) -> Result<(), SessionError> {
    let mut rng = StdRng::seed_from_u64(script.seed);
    let mut switches_left = script.tab_switches;

    loop {
        let view = handle.view().await?;
        if matches!(view.progress.state, ProgressionState::Submitted { .. }) {
            return Ok(());
        }
        let Some(question) = view.question else {
            return Ok(());
        };

        tokio::time::sleep(script.think_time).await;

        if switches_left > 0 {
            switches_left -= 1;
            info!("[candidate] leaving the tab on question {}", view.progress.index + 1);
            faces.set_away(true);
            display.exit_fullscreen();
            handle.visibility_changed(false).await?;
            tokio::time::sleep(script.think_time).await;
            faces.set_away(false);
            handle.visibility_changed(true).await?;
        }

        if let Some(option) = question.options.choose(&mut rng) {
            if let Err(err) = handle.select_option(option.as_str()).await {
                debug!("[candidate] answer not taken: {err}");
            }
        }

        if view.progress.index + 1 >= view.progress.total {
            if let Err(err) = handle.submit().await {
                debug!("[candidate] submit not taken: {err}");
            }
            return Ok(());
        }

        if handle.request_next().await.is_ok() {
            if let Err(err) = handle.confirm_next().await {
                debug!("[candidate] move not taken: {err}");
            }
        }
    }
}
