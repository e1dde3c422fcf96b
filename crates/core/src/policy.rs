//! Tunable proctoring policy: escalation thresholds, timer cadences and the
//! prohibited-object denylist.

use std::time::Duration;

use thiserror::Error;

/// Class label the object classifier uses for people. Never prohibited.
pub const PERSON_CLASS: &str = "person";

/// Object classes that count as a prohibited device by default.
pub const DEFAULT_PROHIBITED_CLASSES: [&str; 11] = [
    "cell phone",
    "laptop",
    "tablet",
    "remote",
    "keyboard",
    "mouse",
    "book",
    "tv",
    "monitor",
    "screen",
    "computer",
];

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("strike limit must be > 0")]
    InvalidStrikeLimit,

    #[error("perceptual violations per strike must be > 0")]
    InvalidPerceptualPerStrike,

    #[error("question duration must be > 0 seconds")]
    InvalidQuestionDuration,

    #[error("minimum face confidence must be in (0, 1]")]
    InvalidFaceConfidence,

    #[error("{0} interval must be > 0")]
    ZeroInterval(&'static str),

    #[error("the person class cannot be prohibited")]
    PersonProhibited,

    #[error("prohibited class names cannot be empty")]
    EmptyClass,
}

//
// ─── TIMINGS ───────────────────────────────────────────────────────────────────
//

/// Cadences of the recurring session tasks and delays of one-shot corrections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound on the face loop rate (one display refresh).
    pub face_frame_interval: Duration,
    pub object_interval: Duration,
    pub countdown_interval: Duration,
    pub autosave_interval: Duration,
    pub fullscreen_poll_interval: Duration,
    /// Delay before the tab-switch warning is shown.
    pub warning_delay: Duration,
    /// Delay after which the tab-switch warning clears itself.
    pub warning_clear_delay: Duration,
    /// Re-acquisition delay after the tab became hidden.
    pub hidden_reacquire_delay: Duration,
    /// Re-acquisition delay after returning to the tab or leaving fullscreen.
    pub restore_reacquire_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            face_frame_interval: Duration::from_millis(16),
            object_interval: Duration::from_millis(2000),
            countdown_interval: Duration::from_millis(1000),
            autosave_interval: Duration::from_millis(5000),
            fullscreen_poll_interval: Duration::from_millis(500),
            warning_delay: Duration::from_millis(1500),
            warning_clear_delay: Duration::from_millis(6500),
            hidden_reacquire_delay: Duration::from_millis(50),
            restore_reacquire_delay: Duration::from_millis(100),
        }
    }
}

impl Timings {
    fn validate(&self) -> Result<(), PolicyError> {
        let recurring = [
            ("face frame", self.face_frame_interval),
            ("object", self.object_interval),
            ("countdown", self.countdown_interval),
            ("autosave", self.autosave_interval),
            ("fullscreen poll", self.fullscreen_poll_interval),
        ];
        for (name, interval) in recurring {
            if interval.is_zero() {
                return Err(PolicyError::ZeroInterval(name));
            }
        }
        Ok(())
    }
}

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Proctoring policy for one session.
///
/// Defaults reproduce the deployed exam: three strikes end the session, every
/// 3000 perceptual violations count as one strike, 90 seconds per question.
#[derive(Debug, Clone, PartialEq)]
pub struct ProctorPolicy {
    strike_limit: u32,
    perceptual_per_strike: u32,
    question_duration_secs: u32,
    min_face_confidence: f32,
    prohibited_classes: Vec<String>,
    timings: Timings,
}

impl Default for ProctorPolicy {
    fn default() -> Self {
        Self {
            strike_limit: 3,
            perceptual_per_strike: 3000,
            question_duration_secs: 90,
            min_face_confidence: 0.5,
            prohibited_classes: DEFAULT_PROHIBITED_CLASSES
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            timings: Timings::default(),
        }
    }
}

impl ProctorPolicy {
    /// Sets the number of strikes that forces submission.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidStrikeLimit` for zero.
    pub fn with_strike_limit(mut self, limit: u32) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::InvalidStrikeLimit);
        }
        self.strike_limit = limit;
        Ok(self)
    }

    /// Sets how many perceptual violations are promoted to one strike.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPerceptualPerStrike` for zero.
    pub fn with_perceptual_per_strike(mut self, per_strike: u32) -> Result<Self, PolicyError> {
        if per_strike == 0 {
            return Err(PolicyError::InvalidPerceptualPerStrike);
        }
        self.perceptual_per_strike = per_strike;
        Ok(self)
    }

    /// Sets the default per-question time limit.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidQuestionDuration` for zero.
    pub fn with_question_duration_secs(mut self, secs: u32) -> Result<Self, PolicyError> {
        if secs == 0 {
            return Err(PolicyError::InvalidQuestionDuration);
        }
        self.question_duration_secs = secs;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns `PolicyError::InvalidFaceConfidence` unless `0 < confidence <= 1`.
    pub fn with_min_face_confidence(mut self, confidence: f32) -> Result<Self, PolicyError> {
        if !confidence.is_finite() || confidence <= 0.0 || confidence > 1.0 {
            return Err(PolicyError::InvalidFaceConfidence);
        }
        self.min_face_confidence = confidence;
        Ok(self)
    }

    /// Replaces the prohibited-object denylist. Names are matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::PersonProhibited` if the list contains `person`, or
    /// `PolicyError::EmptyClass` for blank names.
    pub fn with_prohibited_classes<I, S>(mut self, classes: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for class in classes {
            let class = class.as_ref().trim().to_lowercase();
            if class.is_empty() {
                return Err(PolicyError::EmptyClass);
            }
            if class == PERSON_CLASS {
                return Err(PolicyError::PersonProhibited);
            }
            if !normalized.contains(&class) {
                normalized.push(class);
            }
        }
        self.prohibited_classes = normalized;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns `PolicyError::ZeroInterval` if a recurring cadence is zero.
    pub fn with_timings(mut self, timings: Timings) -> Result<Self, PolicyError> {
        timings.validate()?;
        self.timings = timings;
        Ok(self)
    }

    #[must_use]
    pub fn strike_limit(&self) -> u32 {
        self.strike_limit
    }

    #[must_use]
    pub fn perceptual_per_strike(&self) -> u32 {
        self.perceptual_per_strike
    }

    #[must_use]
    pub fn question_duration_secs(&self) -> u32 {
        self.question_duration_secs
    }

    #[must_use]
    pub fn min_face_confidence(&self) -> f32 {
        self.min_face_confidence
    }

    #[must_use]
    pub fn prohibited_classes(&self) -> &[String] {
        &self.prohibited_classes
    }

    #[must_use]
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Returns true if `class` is on the denylist. `person` never is.
    #[must_use]
    pub fn is_prohibited(&self, class: &str) -> bool {
        let class = class.trim().to_lowercase();
        class != PERSON_CLASS && self.prohibited_classes.contains(&class)
    }
}
