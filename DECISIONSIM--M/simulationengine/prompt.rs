use crate::{assessment::ASSESSMENT_KEYS, company::ContextSnapshot};

/// Builds the simulation prompt for a company context and scenario.
///
/// Pure: identical inputs always produce identical text.
#[must_use]
pub fn build_prompt(context: &ContextSnapshot, scenario: &str) -> String {
    let profile = &context.profile;
    format!(
        "You are a business risk analyst. Return valid JSON only.

Company:
Industry: {industry}
Size: {size}
Model: {model}
Sensitivity: {sensitivity}
Priorities: {priorities}

Decision:
{scenario}

Respond with a single JSON object containing exactly these keys:
{keys}

Rules:
- risk_level, risk_summary and recommendation are strings.
- best_case_outcomes, worst_case_risks and second_order_effects are arrays of strings.
- No prose, no markdown, nothing outside the JSON object.
",
        industry = profile.industry,
        size = profile.size,
        model = profile.operating_model,
        sensitivity = profile.risk_sensitivity,
        priorities = profile.priorities,
        scenario = scenario,
        keys = ASSESSMENT_KEYS.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::company::sample_company;

    #[test]
    fn embeds_context_scenario_and_keys() {
        let snapshot = sample_company("acme").snapshot();
        let prompt = build_prompt(&snapshot, "Open a second warehouse in Lyon");
        for needle in [
            "Industry: Logistics",
            "Size: 200-500",
            "Model: B2B contracts",
            "Sensitivity: Moderate",
            "Priorities: Margin protection, on-time delivery",
            "Open a second warehouse in Lyon",
            "risk_level, risk_summary, best_case_outcomes, worst_case_risks, second_order_effects, recommendation",
        ] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn is_deterministic() {
        let snapshot = sample_company("acme").snapshot();
        assert_eq!(
            build_prompt(&snapshot, "Raise prices 5%"),
            build_prompt(&snapshot, "Raise prices 5%")
        );
        assert_ne!(
            build_prompt(&snapshot, "Raise prices 5%"),
            build_prompt(&snapshot, "Cut prices 5%")
        );
    }
}
