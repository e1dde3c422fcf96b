//! Session integrity monitor: tab visibility and fullscreen enforcement.
//!
//! The monitor is a pure state machine. Platform signals go in, effects come
//! out; the caller owns the timers that carry delayed effects back in.
//!
//! ```text
//! Focused ──visibility lost──▶ Hidden ──visibility restored──▶ Focused
//!    │                                                  (or FullscreenExited
//!    │                                                   if not fullscreen)
//!    └──fullscreen exit──▶ FullscreenExited ──fullscreen restored──▶ Focused
//! ```
//!
//! Hidden dominates: the state is derived from the two platform flags, so a
//! hidden tab that also left fullscreen reports `Hidden` until it is visible.

use std::time::Duration;

use serde::Serialize;

use crate::model::ViolationKind;
use crate::policy::Timings;

//
// ─── STATE & SIGNALS ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityState {
    Focused,
    Hidden,
    FullscreenExited,
}

/// Discrete platform events delivered to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    VisibilityLost,
    VisibilityRestored,
    FullscreenExited,
    FullscreenRestored,
}

/// Work the owner of the monitor must carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityEffect {
    /// Append an integrity violation to the ledger.
    Record(ViolationKind),
    /// Call `warning_due(generation)` after the delay.
    ShowWarning { after: Duration, generation: u64 },
    /// Call `warning_expired(generation)` after the delay.
    ClearWarning { after: Duration, generation: u64 },
    /// Call `begin_reacquire()` after the delay and, if it returns true, request
    /// fullscreen from the platform.
    Reacquire { after: Duration },
}

/// Snapshot of the monitor for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityView {
    pub state: IntegrityState,
    pub paused: bool,
    pub warning_visible: bool,
    pub fullscreen_modal: bool,
    pub tab_switches: u32,
}

//
// ─── MONITOR ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct IntegrityMonitor {
    warning_delay: Duration,
    warning_clear_delay: Duration,
    hidden_reacquire_delay: Duration,
    restore_reacquire_delay: Duration,
    visible: bool,
    fullscreen: bool,
    warning_visible: bool,
    fullscreen_modal: bool,
    reacquire_pending: bool,
    tab_switches: u32,
    warning_generation: u64,
}

impl IntegrityMonitor {
    /// Creates a monitor for a visible page whose fullscreen status is `fullscreen`.
    #[must_use]
    pub fn new(timings: &Timings, fullscreen: bool) -> Self {
        Self {
            warning_delay: timings.warning_delay,
            warning_clear_delay: timings.warning_clear_delay,
            hidden_reacquire_delay: timings.hidden_reacquire_delay,
            restore_reacquire_delay: timings.restore_reacquire_delay,
            visible: true,
            fullscreen,
            warning_visible: false,
            fullscreen_modal: !fullscreen,
            reacquire_pending: false,
            tab_switches: 0,
            warning_generation: 0,
        }
    }

    /// Effects to run when the session starts: enter fullscreen if not already.
    pub fn startup_effects(&mut self) -> Vec<IntegrityEffect> {
        if self.fullscreen {
            return Vec::new();
        }
        self.schedule_reacquire(self.hidden_reacquire_delay)
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn state(&self) -> IntegrityState {
        if !self.visible {
            IntegrityState::Hidden
        } else if !self.fullscreen {
            IntegrityState::FullscreenExited
        } else {
            IntegrityState::Focused
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        !self.visible
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    #[must_use]
    pub fn reacquire_pending(&self) -> bool {
        self.reacquire_pending
    }

    #[must_use]
    pub fn view(&self) -> IntegrityView {
        IntegrityView {
            state: self.state(),
            paused: self.is_paused(),
            warning_visible: self.warning_visible,
            fullscreen_modal: self.fullscreen_modal,
            tab_switches: self.tab_switches,
        }
    }

    /// Applies a platform signal. Repeated signals that do not change the
    /// corresponding flag are ignored.
    pub fn handle(&mut self, signal: PlatformSignal) -> Vec<IntegrityEffect> {
        let mut effects = Vec::new();
        match signal {
            PlatformSignal::VisibilityLost => {
                if !self.visible {
                    return effects;
                }
                self.visible = false;
                self.tab_switches = self.tab_switches.saturating_add(1);
                self.warning_generation += 1;
                let generation = self.warning_generation;

                effects.push(IntegrityEffect::Record(ViolationKind::TabHidden));
                effects.push(IntegrityEffect::ShowWarning {
                    after: self.warning_delay,
                    generation,
                });
                effects.extend(self.schedule_reacquire(self.hidden_reacquire_delay));
                effects.push(IntegrityEffect::ClearWarning {
                    after: self.warning_clear_delay,
                    generation,
                });
            }
            PlatformSignal::VisibilityRestored => {
                if self.visible {
                    return effects;
                }
                self.visible = true;
                if !self.fullscreen {
                    effects.extend(self.schedule_reacquire(self.restore_reacquire_delay));
                }
            }
            PlatformSignal::FullscreenExited => {
                if !self.fullscreen {
                    return effects;
                }
                self.fullscreen = false;
                self.fullscreen_modal = true;
                effects.push(IntegrityEffect::Record(ViolationKind::FullscreenExited));
                effects.extend(self.schedule_reacquire(self.restore_reacquire_delay));
            }
            PlatformSignal::FullscreenRestored => {
                self.fullscreen = true;
                self.fullscreen_modal = false;
            }
        }
        effects
    }

    /// Background fullscreen check. Catches exits and restores whose native event
    /// was missed and retries acquisition when nothing is in flight.
    pub fn poll(&mut self, is_fullscreen: bool) -> Vec<IntegrityEffect> {
        if is_fullscreen {
            if !self.fullscreen {
                self.handle(PlatformSignal::FullscreenRestored);
            }
            return Vec::new();
        }

        let mut effects = if self.fullscreen {
            self.handle(PlatformSignal::FullscreenExited)
        } else {
            Vec::new()
        };
        self.fullscreen_modal = true;
        effects.extend(self.schedule_reacquire(Duration::ZERO));
        effects
    }

    /// A scheduled re-acquisition is due. Returns true if fullscreen should be
    /// requested now; the caller must report back through `finish_reacquire`.
    pub fn begin_reacquire(&mut self) -> bool {
        if self.fullscreen {
            self.reacquire_pending = false;
            return false;
        }
        self.reacquire_pending = true;
        true
    }

    /// Records the outcome of a fullscreen request. Failures are left for the
    /// next poll to retry.
    pub fn finish_reacquire(&mut self, succeeded: bool) {
        self.reacquire_pending = false;
        if succeeded {
            self.handle(PlatformSignal::FullscreenRestored);
        }
    }

    /// The delayed warning for `generation` is due. Stale generations are ignored.
    pub fn warning_due(&mut self, generation: u64) -> bool {
        if generation != self.warning_generation {
            return false;
        }
        self.warning_visible = true;
        true
    }

    /// The warning for `generation` expired. Stale generations are ignored.
    pub fn warning_expired(&mut self, generation: u64) -> bool {
        if generation != self.warning_generation {
            return false;
        }
        self.warning_visible = false;
        true
    }

    fn schedule_reacquire(&mut self, after: Duration) -> Option<IntegrityEffect> {
        if self.reacquire_pending {
            return None;
        }
        self.reacquire_pending = true;
        Some(IntegrityEffect::Reacquire { after })
    }
}

//
// ─── INPUT SUPPRESSION ─────────────────────────────────────────────────────────
//

/// A key press with its modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyCombo {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyCombo {
    #[must_use]
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ctrl_shift(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            shift: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn meta_alt(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            alt: true,
            meta: true,
            ..Self::default()
        }
    }
}

/// User input the exam page may swallow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    ContextMenu,
    Copy,
    Cut,
    Paste,
    Key(KeyCombo),
}

/// Input restrictions active for the whole session, independent of state.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputGuard;

impl InputGuard {
    /// Returns true if the event must be suppressed.
    #[must_use]
    pub fn suppresses(&self, event: &InputEvent) -> bool {
        match event {
            InputEvent::ContextMenu | InputEvent::Copy | InputEvent::Cut | InputEvent::Paste => {
                true
            }
            InputEvent::Key(combo) => Self::is_blocked_key(combo),
        }
    }

    fn is_blocked_key(combo: &KeyCombo) -> bool {
        let key = combo.key.to_ascii_uppercase();
        match key.as_str() {
            "ESCAPE" | "F12" => true,
            "I" | "J" => (combo.ctrl && combo.shift) || (combo.meta && combo.alt),
            "U" | "C" | "V" | "S" => combo.ctrl,
            _ => false,
        }
    }
}
