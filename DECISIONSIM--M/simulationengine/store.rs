use std::{collections::HashMap, path::PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::{company::Company, decision::Decision};

/// Failures raised by the context and decision stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No company is registered under the key.
    #[error("company `{0}` not found")]
    NotFound(String),
    /// A company with the key already exists.
    #[error("company key `{0}` already exists")]
    DuplicateKey(String),
    /// Reading or writing a record failed.
    #[error("storage I/O failed at {}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A record could not be encoded or decoded.
    #[error("record at {} is not valid JSON: {source}", .path.display())]
    Serialization {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// A record could not be encoded before writing.
    #[error("record could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Company records keyed by `company_key`.
pub trait ContextStore: Send + Sync {
    /// Looks a company up by key.
    fn get(&self, company_key: &str) -> Result<Option<Company>, StoreError>;
    /// Registers a new company; fails with [`StoreError::DuplicateKey`].
    fn create(&self, company: Company) -> Result<Company, StoreError>;
    /// Replaces an existing company; fails with [`StoreError::NotFound`].
    fn update(&self, company: Company) -> Result<Company, StoreError>;
}

/// Append-only decision records.
pub trait DecisionStore: Send + Sync {
    /// Persists a decision and returns it.
    fn insert(&self, decision: Decision) -> Result<Decision, StoreError>;
    /// Decisions of one company, newest first.
    fn list_by_company(&self, company_id: Uuid) -> Result<Vec<Decision>, StoreError>;
}

/// Newest first. The sort is stable, so callers pass rows in the order
/// ties should keep.
pub(crate) fn sort_newest_first(decisions: &mut [Decision]) {
    decisions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// In-process store implementing both traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    companies: RwLock<HashMap<String, Company>>,
    decisions: RwLock<HashMap<Uuid, Vec<Decision>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored decisions across all companies.
    #[must_use]
    pub fn decision_count(&self) -> usize {
        self.decisions.read().values().map(Vec::len).sum()
    }
}

impl ContextStore for MemoryStore {
    fn get(&self, company_key: &str) -> Result<Option<Company>, StoreError> {
        Ok(self.companies.read().get(company_key).cloned())
    }

    fn create(&self, company: Company) -> Result<Company, StoreError> {
        let mut companies = self.companies.write();
        if companies.contains_key(&company.company_key) {
            return Err(StoreError::DuplicateKey(company.company_key));
        }
        companies.insert(company.company_key.clone(), company.clone());
        Ok(company)
    }

    fn update(&self, company: Company) -> Result<Company, StoreError> {
        let mut companies = self.companies.write();
        match companies.get_mut(&company.company_key) {
            Some(slot) => {
                *slot = company.clone();
                Ok(company)
            }
            None => Err(StoreError::NotFound(company.company_key)),
        }
    }
}

impl DecisionStore for MemoryStore {
    fn insert(&self, decision: Decision) -> Result<Decision, StoreError> {
        self.decisions
            .write()
            .entry(decision.company_id)
            .or_default()
            .push(decision.clone());
        Ok(decision)
    }

    fn list_by_company(&self, company_id: Uuid) -> Result<Vec<Decision>, StoreError> {
        let mut rows: Vec<Decision> = self
            .decisions
            .read()
            .get(&company_id)
            .map(|rows| rows.iter().rev().cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assessment::Assessment, company::sample_company};
    use chrono::{Duration, Utc};

    #[test]
    fn create_rejects_duplicate_keys() {
        let store = MemoryStore::new();
        store.create(sample_company("acme")).unwrap();
        assert!(matches!(
            store.create(sample_company("acme")),
            Err(StoreError::DuplicateKey(key)) if key == "acme"
        ));
        assert!(store.get("acme").unwrap().is_some());
        assert!(store.get("other").unwrap().is_none());
    }

    #[test]
    fn update_requires_existing_company() {
        let store = MemoryStore::new();
        let company = sample_company("acme");
        assert!(matches!(
            store.update(company.clone()),
            Err(StoreError::NotFound(_))
        ));
        store.create(company.clone()).unwrap();
        let mut profile = company.profile.clone();
        profile.size = "1000+".into();
        store.update(company.with_profile(profile)).unwrap();
        assert_eq!(store.get("acme").unwrap().unwrap().profile.size, "1000+");
    }

    #[test]
    fn lists_newest_first_with_ties_to_later_insert() {
        let store = MemoryStore::new();
        let company = sample_company("acme");
        let base = Utc::now();
        let make = |label: &str, offset: i64| {
            let mut decision =
                Decision::new(&company, label, &Assessment::fallback(), None).unwrap();
            decision.created_at = base + Duration::seconds(offset);
            store.insert(decision).unwrap();
        };
        make("old", 0);
        make("newest", 10);
        make("tie-first", 5);
        make("tie-second", 5);

        let order: Vec<String> = store
            .list_by_company(company.id)
            .unwrap()
            .into_iter()
            .map(|d| d.description)
            .collect();
        assert_eq!(order, ["newest", "tie-second", "tie-first", "old"]);
        assert_eq!(store.decision_count(), 4);
        assert!(store.list_by_company(Uuid::new_v4()).unwrap().is_empty());
    }
}
