//! Row-quality rules applied between validation and planning.
//!
//! A gate is an ordered set of named rules. Every rule sees every row, so
//! the violation report is always complete; what happens to a violating
//! row is decided by the most severe action among the rules it tripped.
//! Warn-only violations pass through counted, drop violations exclude the
//! row, and a single fail violation aborts the whole batch before anything
//! reaches the planner.

use crate::event::{ChangeEvent, Row};

/// Enforcement action bound to a rule, in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityAction {
    /// Count and log the violation, keep the row.
    Warn,
    /// Exclude the row from the batch.
    Drop,
    /// Abort the batch.
    Fail,
}

impl std::fmt::Display for QualityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "warn"),
            Self::Drop => write!(f, "drop"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A named predicate over row payloads.
///
/// The predicate returns `true` for rows that satisfy the rule.
pub struct QualityRule {
    name: String,
    action: QualityAction,
    predicate: Box<dyn Fn(&Row) -> bool + Send + Sync>,
}

impl QualityRule {
    /// Creates a rule with an explicit action.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        action: QualityAction,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            predicate: Box::new(predicate),
        }
    }

    /// A warn-only rule: violations are counted but rows pass.
    #[must_use]
    pub fn expect(
        name: impl Into<String>,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, QualityAction::Warn, predicate)
    }

    /// A dropping rule: violating rows are excluded from the batch.
    #[must_use]
    pub fn expect_or_drop(
        name: impl Into<String>,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, QualityAction::Drop, predicate)
    }

    /// A failing rule: any violation aborts the batch.
    #[must_use]
    pub fn expect_or_fail(
        name: impl Into<String>,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, QualityAction::Fail, predicate)
    }

    /// The rule's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rule's enforcement action.
    #[must_use]
    pub fn action(&self) -> QualityAction {
        self.action
    }

    fn accepts(&self, row: &Row) -> bool {
        (self.predicate)(row)
    }
}

impl std::fmt::Debug for QualityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Violation count for one rule over one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    /// Name of the violated rule.
    pub rule: String,
    /// The rule's action.
    pub action: QualityAction,
    /// How many rows violated it.
    pub rows: u64,
}

/// Result of gating one batch.
#[derive(Debug)]
pub struct GateOutcome {
    /// Events admitted to the planner, in input order.
    pub admitted: Vec<ChangeEvent>,
    /// Every rule that was violated, with counts, in rule order.
    pub violations: Vec<RuleViolation>,
    /// Rows excluded by drop-action rules.
    pub dropped: u64,
    /// Rows kept despite warn-action violations.
    pub warned: u64,
}

/// Batch abort raised by a fail-action rule.
///
/// Carries the full violation report so nothing observed during the scan
/// is lost to the abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("quality rule '{rule}' failed {rows} row(s)")]
pub struct QualityGateFailure {
    /// First fail-action rule that was violated, in rule order.
    pub rule: String,
    /// Rows that violated it.
    pub rows: u64,
    /// Every violation observed in the batch, fail or otherwise.
    pub violations: Vec<RuleViolation>,
}

/// An ordered set of quality rules.
#[derive(Debug, Default)]
pub struct QualityGate {
    rules: Vec<QualityRule>,
}

impl QualityGate {
    /// Creates a gate from an ordered rule set.
    #[must_use]
    pub fn new(rules: Vec<QualityRule>) -> Self {
        Self { rules }
    }

    /// Returns `true` if the gate has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule against every event's payload.
    ///
    /// The scan always completes before the outcome is decided, so the
    /// violation report covers the whole batch even when it aborts.
    ///
    /// # Errors
    ///
    /// Returns [`QualityGateFailure`] if any fail-action rule was violated
    /// by at least one row.
    pub fn evaluate(&self, events: Vec<ChangeEvent>) -> Result<GateOutcome, QualityGateFailure> {
        if self.rules.is_empty() {
            return Ok(GateOutcome {
                admitted: events,
                violations: Vec::new(),
                dropped: 0,
                warned: 0,
            });
        }

        let mut counts = vec![0u64; self.rules.len()];
        let mut judged: Vec<(ChangeEvent, Option<QualityAction>)> =
            Vec::with_capacity(events.len());

        for event in events {
            let mut worst: Option<QualityAction> = None;
            for (i, rule) in self.rules.iter().enumerate() {
                if !rule.accepts(&event.payload) {
                    counts[i] += 1;
                    worst = worst.max(Some(rule.action));
                }
            }
            judged.push((event, worst));
        }

        let violations: Vec<RuleViolation> = self
            .rules
            .iter()
            .zip(&counts)
            .filter(|(_, &rows)| rows > 0)
            .map(|(rule, &rows)| RuleViolation {
                rule: rule.name.clone(),
                action: rule.action,
                rows,
            })
            .collect();

        if let Some(failed) = violations
            .iter()
            .find(|v| v.action == QualityAction::Fail)
        {
            return Err(QualityGateFailure {
                rule: failed.rule.clone(),
                rows: failed.rows,
                violations,
            });
        }

        let mut outcome = GateOutcome {
            admitted: Vec::with_capacity(judged.len()),
            violations,
            dropped: 0,
            warned: 0,
        };
        for (event, worst) in judged {
            match worst {
                None => outcome.admitted.push(event),
                Some(QualityAction::Warn) => {
                    outcome.warned += 1;
                    outcome.admitted.push(event);
                }
                Some(QualityAction::Drop | QualityAction::Fail) => outcome.dropped += 1,
            }
        }
        Ok(outcome)
    }
}
