use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{assessment::Assessment, company::Company};

/// Author recorded when none is supplied.
pub const DEFAULT_CREATED_BY: &str = "Team";

/// Persisted simulation result.
///
/// `assessment` and `context_snapshot` hold serialized JSON text and are
/// never rewritten after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Record identifier.
    pub id: Uuid,
    /// Owning company.
    pub company_id: Uuid,
    /// Scenario text as submitted.
    pub description: String,
    /// Normalized assessment as JSON text.
    pub assessment: String,
    /// Author label.
    pub created_by: String,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Company context at simulation time, as JSON text.
    pub context_snapshot: String,
}

impl Decision {
    /// Builds a record from a normalized assessment.
    pub fn new(
        company: &Company,
        description: &str,
        assessment: &Assessment,
        created_by: Option<&str>,
    ) -> serde_json::Result<Self> {
        let created_by = created_by
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_CREATED_BY);
        Ok(Self {
            id: Uuid::new_v4(),
            company_id: company.id,
            description: description.to_owned(),
            assessment: assessment.to_json()?,
            created_by: created_by.to_owned(),
            created_at: Utc::now(),
            context_snapshot: company.snapshot().to_json()?,
        })
    }
}
