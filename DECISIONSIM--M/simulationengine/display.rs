use std::fmt::Write as _;

use serde::Serialize;

use crate::{
    assessment::Assessment,
    company::{Company, ContextSnapshot},
    decision::Decision,
};

/// Read-side view of a stored decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionView {
    /// The stored record, untouched.
    pub decision: Decision,
    /// Parsed assessment, or the fallback record.
    pub assessment: Assessment,
    /// True when the stored assessment was unreadable.
    pub recovered: bool,
    /// Parsed context snapshot, absent when unreadable.
    pub snapshot: Option<ContextSnapshot>,
}

impl DecisionView {
    /// Projects a stored decision. Never fails.
    #[must_use]
    pub fn project(decision: Decision) -> Self {
        let (assessment, recovered) = match Assessment::from_stored(&decision.assessment) {
            Some(assessment) => (assessment, false),
            None => {
                tracing::debug!(decision_id = %decision.id, "stored assessment unreadable, using fallback");
                (Assessment::fallback(), true)
            }
        };
        let snapshot = ContextSnapshot::from_json(&decision.context_snapshot).ok();
        Self {
            decision,
            assessment,
            recovered,
            snapshot,
        }
    }
}

/// A company together with its decisions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workspace {
    /// The company.
    pub company: Company,
    /// Projected decisions.
    pub decisions: Vec<DecisionView>,
}

/// Plain-text rendering of one decision.
#[must_use]
pub fn render_text(view: &DecisionView) -> String {
    let decision = &view.decision;
    let assessment = &view.assessment;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}] {} (by {})",
        decision.created_at.format("%Y-%m-%d %H:%M"),
        decision.description,
        decision.created_by
    );
    let _ = writeln!(out, "  Risk level: {}", assessment.risk_level_text());
    let _ = writeln!(out, "  Summary: {}", assessment.risk_summary_text());
    for (title, items) in [
        ("Best case", &assessment.best_case_outcomes),
        ("Worst case", &assessment.worst_case_risks),
        ("Second-order effects", &assessment.second_order_effects),
    ] {
        let _ = writeln!(out, "  {title}:");
        if items.is_empty() {
            let _ = writeln!(out, "    (none)");
        }
        for item in items {
            let _ = writeln!(out, "    - {item}");
        }
    }
    let _ = writeln!(out, "  Recommendation: {}", assessment.recommendation_text());
    if let Some(snapshot) = &view.snapshot {
        let profile = &snapshot.profile;
        let _ = writeln!(
            out,
            "  Context: {} / {} / {} / sensitivity {}",
            profile.industry, profile.size, profile.operating_model, profile.risk_sensitivity
        );
    }
    out
}
