//! Append-only violation ledger with strike escalation.
//!
//! Integrity violations (tab hidden, fullscreen exited) are strikes on their own.
//! Perceptual violations arrive once per detection cycle, so they are only
//! promoted to a strike every `perceptual_per_strike` occurrences. Reaching the
//! strike limit seals the ledger and fires the force-submit signal once.

use std::collections::BTreeMap;

use crate::model::{ViolationEvent, ViolationKind, ViolationSource};
use crate::policy::ProctorPolicy;

/// Thresholds the ledger escalates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub strike_limit: u32,
    pub perceptual_per_strike: u32,
}

impl From<&ProctorPolicy> for EscalationPolicy {
    fn from(policy: &ProctorPolicy) -> Self {
        Self {
            strike_limit: policy.strike_limit(),
            perceptual_per_strike: policy.perceptual_per_strike(),
        }
    }
}

/// What a single `record` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub strike_count: u32,
    /// The event added a strike.
    pub struck: bool,
    /// The event sealed the ledger. True for exactly one call per ledger.
    pub force_submit: bool,
}

#[derive(Debug, Clone)]
pub struct ViolationLedger {
    policy: EscalationPolicy,
    events: Vec<ViolationEvent>,
    perceptual_count: u64,
    strike_count: u32,
    sealed: bool,
}

impl ViolationLedger {
    #[must_use]
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            events: Vec::new(),
            perceptual_count: 0,
            strike_count: 0,
            sealed: false,
        }
    }

    /// Appends `event` and applies the escalation policy.
    ///
    /// After sealing, events are still appended for audit but the strike count is
    /// frozen and `force_submit` is never reported again.
    pub fn record(&mut self, event: ViolationEvent) -> RecordOutcome {
        let source = event.source();
        self.events.push(event);

        if self.sealed {
            return RecordOutcome {
                strike_count: self.strike_count,
                struck: false,
                force_submit: false,
            };
        }

        let struck = match source {
            ViolationSource::Integrity => true,
            ViolationSource::Perceptual => {
                self.perceptual_count += 1;
                self.perceptual_count % u64::from(self.policy.perceptual_per_strike) == 0
            }
        };
        if struck {
            self.strike_count = self.strike_count.saturating_add(1);
        }

        let force_submit = self.strike_count >= self.policy.strike_limit;
        if force_submit {
            self.sealed = true;
        }

        RecordOutcome {
            strike_count: self.strike_count,
            struck,
            force_submit,
        }
    }

    #[must_use]
    pub fn strike_count(&self) -> u32 {
        self.strike_count
    }

    #[must_use]
    pub fn perceptual_count(&self) -> u64 {
        self.perceptual_count
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn events(&self) -> &[ViolationEvent] {
        &self.events
    }

    #[must_use]
    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    /// Number of recorded events per kind, for the audit summary.
    #[must_use]
    pub fn counts_by_kind(&self) -> BTreeMap<ViolationKind, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn ledger(strike_limit: u32, perceptual_per_strike: u32) -> ViolationLedger {
        ViolationLedger::new(EscalationPolicy {
            strike_limit,
            perceptual_per_strike,
        })
    }

    #[test]
    fn three_tab_switches_force_submission() {
        let mut ledger = ledger(3, 3000);
        let first = ledger.record(ViolationEvent::tab_hidden(fixed_now()));
        let second = ledger.record(ViolationEvent::tab_hidden(fixed_now()));
        let third = ledger.record(ViolationEvent::tab_hidden(fixed_now()));

        assert_eq!((first.strike_count, first.force_submit), (1, false));
        assert_eq!((second.strike_count, second.force_submit), (2, false));
        assert_eq!((third.strike_count, third.force_submit), (3, true));
        assert!(ledger.is_sealed());
    }

    #[test]
    fn perceptual_violations_are_aggregated() {
        let mut ledger = ledger(3, 3000);
        let mut struck = 0;
        for _ in 0..3000 {
            if ledger.record(ViolationEvent::no_face(fixed_now())).struck {
                struck += 1;
            }
        }
        assert_eq!(struck, 1);
        assert_eq!(ledger.strike_count(), 1);
        assert_eq!(ledger.len(), 3000);
        assert_eq!(ledger.perceptual_count(), 3000);

        ledger.record(ViolationEvent::no_face(fixed_now()));
        assert_eq!(ledger.strike_count(), 1);
    }

    #[test]
    fn mixed_perceptual_kinds_share_one_counter() {
        let mut ledger = ledger(3, 2);
        ledger.record(ViolationEvent::no_face(fixed_now()));
        let outcome = ledger.record(ViolationEvent::multi_face(2, fixed_now()));
        assert!(outcome.struck);
        assert_eq!(outcome.strike_count, 1);
    }

    #[test]
    fn sealing_fires_once_and_keeps_auditing() {
        let mut ledger = ledger(1, 3000);
        assert!(ledger.record(ViolationEvent::fullscreen_exited(fixed_now())).force_submit);

        for _ in 0..5 {
            let outcome = ledger.record(ViolationEvent::tab_hidden(fixed_now()));
            assert!(!outcome.force_submit);
            assert!(!outcome.struck);
            assert_eq!(outcome.strike_count, 1);
        }
        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger.counts_by_kind()[&ViolationKind::TabHidden], 5);
    }

    #[test]
    fn strike_count_is_monotonic_over_any_sequence() {
        let mut ledger = ledger(50, 3);
        let mut last = 0;
        for i in 0..200 {
            let event = if i % 7 == 0 {
                ViolationEvent::tab_hidden(fixed_now())
            } else {
                ViolationEvent::no_face(fixed_now())
            };
            let outcome = ledger.record(event);
            assert!(outcome.strike_count >= last);
            last = outcome.strike_count;
        }
    }

    #[test]
    fn escalation_policy_reads_from_proctor_policy() {
        let policy = ProctorPolicy::default().with_strike_limit(5).unwrap();
        let escalation = EscalationPolicy::from(&policy);
        assert_eq!(escalation.strike_limit, 5);
        assert_eq!(escalation.perceptual_per_strike, 3000);
    }
}
