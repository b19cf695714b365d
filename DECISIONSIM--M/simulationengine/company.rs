use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Business context fields that describe a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    /// Industry the company operates in.
    pub industry: String,
    /// Headcount or revenue band, free text.
    pub size: String,
    /// Operating model (e.g. B2B SaaS, marketplace).
    #[serde(rename = "model")]
    pub operating_model: String,
    /// Appetite for risk, free text.
    #[serde(rename = "sensitivity")]
    pub risk_sensitivity: String,
    /// Current strategic priorities, free text.
    pub priorities: String,
}

/// Input for registering a company under a human-chosen key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCompany {
    /// Unique key chosen by the organization.
    pub company_key: String,
    /// Business context.
    #[serde(flatten)]
    pub profile: CompanyProfile,
}

/// Stored company record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Surrogate identifier referenced by decisions.
    pub id: Uuid,
    /// Unique human-chosen key.
    pub company_key: String,
    /// Business context.
    #[serde(flatten)]
    pub profile: CompanyProfile,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last time the profile changed.
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Creates a new record with a fresh id.
    #[must_use]
    pub fn new(input: NewCompany) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_key: input.company_key,
            profile: input.profile,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy with the profile replaced and `updated_at` bumped.
    #[must_use]
    pub fn with_profile(mut self, profile: CompanyProfile) -> Self {
        self.profile = profile;
        self.updated_at = Utc::now();
        self
    }

    /// Captures the company's current context.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            company_key: self.company_key.clone(),
            profile: self.profile.clone(),
        }
    }
}

/// Copy of a company's context at the moment a decision was simulated.
///
/// Serialized as a flat JSON object with the keys `company_key`, `industry`,
/// `size`, `model`, `sensitivity` and `priorities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Key of the company the snapshot was taken from.
    pub company_key: String,
    /// Context fields.
    #[serde(flatten)]
    pub profile: CompanyProfile,
}

impl ContextSnapshot {
    /// Serializes the snapshot for storage.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a stored snapshot.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
pub(crate) fn sample_company(key: &str) -> Company {
    Company::new(NewCompany {
        company_key: key.into(),
        profile: CompanyProfile {
            industry: "Logistics".into(),
            size: "200-500".into(),
            operating_model: "B2B contracts".into(),
            risk_sensitivity: "Moderate".into(),
            priorities: "Margin protection, on-time delivery".into(),
        },
    })
}
