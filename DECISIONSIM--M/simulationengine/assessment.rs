use serde::Serialize;
use serde_json::{json, Value};

/// Keys the model is asked to return, in persisted order.
pub const ASSESSMENT_KEYS: [&str; 6] = [
    "risk_level",
    "risk_summary",
    "best_case_outcomes",
    "worst_case_risks",
    "second_order_effects",
    "recommendation",
];

/// Risk level shown when a stored assessment cannot be read.
pub const FALLBACK_RISK_LEVEL: &str = "Unknown";
/// Summary shown when a stored assessment cannot be read.
pub const FALLBACK_RISK_SUMMARY: &str = "This decision could not be parsed.";
/// Recommendation shown when a stored assessment cannot be read.
pub const FALLBACK_RECOMMENDATION: &str = "No recommendation available.";

/// Normalized risk assessment for one decision.
///
/// The three list fields are always sequences of strings. The scalar fields
/// carry whatever JSON the model produced (`null` when absent).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    /// Model-determined risk label.
    pub risk_level: Value,
    /// Short narrative of the risk picture.
    pub risk_summary: Value,
    /// Favourable outcomes, model order.
    pub best_case_outcomes: Vec<String>,
    /// Unfavourable outcomes, model order.
    pub worst_case_risks: Vec<String>,
    /// Knock-on effects, model order.
    pub second_order_effects: Vec<String>,
    /// Suggested course of action.
    pub recommendation: Value,
}

impl Assessment {
    /// Canonical record substituted for unreadable stored assessments.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            risk_level: Value::from(FALLBACK_RISK_LEVEL),
            risk_summary: Value::from(FALLBACK_RISK_SUMMARY),
            best_case_outcomes: Vec::new(),
            worst_case_risks: Vec::new(),
            second_order_effects: Vec::new(),
            recommendation: Value::from(FALLBACK_RECOMMENDATION),
        }
    }

    /// Parses persisted text and normalizes it.
    ///
    /// Returns `None` when the text is not JSON or not a JSON object.
    #[must_use]
    pub fn from_stored(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        value.is_object().then(|| normalize(&value))
    }

    /// JSON object with exactly the six assessment keys.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "risk_level": self.risk_level,
            "risk_summary": self.risk_summary,
            "best_case_outcomes": self.best_case_outcomes,
            "worst_case_risks": self.worst_case_risks,
            "second_order_effects": self.second_order_effects,
            "recommendation": self.recommendation,
        })
    }

    /// Serializes the assessment for storage.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Risk level as display text.
    #[must_use]
    pub fn risk_level_text(&self) -> String {
        scalar_text(&self.risk_level)
    }

    /// Risk summary as display text.
    #[must_use]
    pub fn risk_summary_text(&self) -> String {
        scalar_text(&self.risk_summary)
    }

    /// Recommendation as display text.
    #[must_use]
    pub fn recommendation_text(&self) -> String {
        scalar_text(&self.recommendation)
    }
}

/// Coerces an assessment-like JSON value into an [`Assessment`].
///
/// List fields are normalized independently; scalar fields pass through.
/// Non-object input yields `null` scalars and empty lists. Running the result
/// back through `normalize` changes nothing.
#[must_use]
pub fn normalize(raw: &Value) -> Assessment {
    Assessment {
        risk_level: passthrough(raw.get("risk_level")),
        risk_summary: passthrough(raw.get("risk_summary")),
        best_case_outcomes: ListShape::of(raw.get("best_case_outcomes")).into_strings(),
        worst_case_risks: ListShape::of(raw.get("worst_case_risks")).into_strings(),
        second_order_effects: ListShape::of(raw.get("second_order_effects")).into_strings(),
        recommendation: passthrough(raw.get("recommendation")),
    }
}

/// Shape of a list field as the model returned it.
enum ListShape<'a> {
    Sequence(&'a [Value]),
    Scalar(&'a str),
    Other,
}

impl<'a> ListShape<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::Array(items)) => Self::Sequence(items),
            Some(Value::String(text)) => Self::Scalar(text),
            _ => Self::Other,
        }
    }

    fn into_strings(self) -> Vec<String> {
        match self {
            Self::Sequence(items) => items.iter().map(element_text).collect(),
            Self::Scalar(text) => vec![text.to_owned()],
            Self::Other => Vec::new(),
        }
    }
}

// Strings are kept verbatim; any other element keeps its slot as compact JSON.
fn element_text(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn passthrough(value: Option<&Value>) -> Value {
    value.cloned().unwrap_or(Value::Null)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
