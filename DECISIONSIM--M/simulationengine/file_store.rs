use std::{
    fmt::Write as _,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    company::Company,
    decision::Decision,
    store::{sort_newest_first, ContextStore, DecisionStore, StoreError},
};

/// Directory-backed store with one JSON file per record.
///
/// Layout under the root:
/// `companies/<encoded key>.json` and
/// `decisions/<company_id>/<decision_id>.json`.
///
/// The company key is the file name, so uniqueness holds across processes:
/// creation links a finished temp file into place and the filesystem rejects
/// an existing name. Decisions sharing a `created_at` are ordered by id.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [root.join("companies"), root.join("decisions")] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        }
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn companies_dir(&self) -> PathBuf {
        self.root.join("companies")
    }

    fn company_path(&self, company_key: &str) -> PathBuf {
        self.companies_dir()
            .join(format!("{}.json", encode_key(company_key)))
    }

    fn decisions_dir(&self, company_id: Uuid) -> PathBuf {
        self.root.join("decisions").join(company_id.to_string())
    }
}

impl ContextStore for FileStore {
    fn get(&self, company_key: &str) -> Result<Option<Company>, StoreError> {
        let path = self.company_path(company_key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Serialization { path, source })
    }

    fn create(&self, company: Company) -> Result<Company, StoreError> {
        let dir = self.companies_dir();
        let path = self.company_path(&company.company_key);
        let tmp = write_temp(&dir, &company)?;
        let linked = fs::hard_link(&tmp, &path);
        discard_temp(&tmp);
        match linked {
            Ok(()) => Ok(company),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::DuplicateKey(company.company_key))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn update(&self, company: Company) -> Result<Company, StoreError> {
        let path = self.company_path(&company.company_key);
        if !path.is_file() {
            return Err(StoreError::NotFound(company.company_key));
        }
        let tmp = write_temp(&self.companies_dir(), &company)?;
        fs::rename(&tmp, &path).map_err(|source| {
            discard_temp(&tmp);
            StoreError::Io { path, source }
        })?;
        Ok(company)
    }
}

impl DecisionStore for FileStore {
    fn insert(&self, decision: Decision) -> Result<Decision, StoreError> {
        let dir = self.decisions_dir(decision.company_id);
        let path = dir.join(format!("{}.json", decision.id));
        let tmp = write_temp(&dir, &decision)?;
        fs::rename(&tmp, &path).map_err(|source| {
            discard_temp(&tmp);
            StoreError::Io { path, source }
        })?;
        Ok(decision)
    }

    fn list_by_company(&self, company_id: Uuid) -> Result<Vec<Decision>, StoreError> {
        let mut rows = read_decisions(&self.decisions_dir(company_id))?;
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

/// File-name form of a company key: ASCII alphanumerics, `-` and `_` are
/// kept, every other byte becomes `%XX`.
fn encode_key(company_key: &str) -> String {
    let mut name = String::with_capacity(company_key.len());
    for byte in company_key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(char::from(byte));
        } else {
            let _ = write!(name, "%{byte:02X}");
        }
    }
    if name.is_empty() {
        name.push('%');
    }
    name
}

/// Writes `record` to a uniquely named hidden temp file in `dir`.
fn write_temp<T: Serialize>(dir: &Path, record: &T) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let data = serde_json::to_vec_pretty(record).map_err(StoreError::Encode)?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, data).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    Ok(tmp)
}

fn discard_temp(tmp: &Path) {
    if let Err(err) = fs::remove_file(tmp) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %err, "failed to remove temp file");
        }
    }
}

/// Reads every decision file in `dir`. Unreadable files are skipped with a
/// warning so one damaged row never hides the rest.
fn read_decisions(dir: &Path) -> Result<Vec<Decision>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut rows = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read(&path)
            .map_err(|err| err.to_string())
            .and_then(|data| {
                serde_json::from_slice::<Decision>(&data).map_err(|err| err.to_string())
            });
        match parsed {
            Ok(decision) => rows.push(decision),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping unreadable decision file");
            }
        }
    }
    Ok(rows)
}
