use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::{Map, Value};

use crate::constants::SCHEMA_VERSION;

/// Reasons a parsed record is not dispatchable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("repo path must be absolute: {0}")]
    RelativeRepoPath(String),

    #[error("branch is empty")]
    EmptyBranch,

    #[error("record written by a newer schema (version {0})")]
    NewerSchema(u32),
}

/// Pre-authorized upload destination for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedTarget {
    pub url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Relative path → target. `None` means the target was empty or invalid.
///
/// A `BTreeMap` keeps entries sorted by path, which fixes chunk membership
/// across retries.
pub type Targets = BTreeMap<String, Option<PresignedTarget>>;

/// The `(locked_by, locked_at)` pair used for compare-and-swap updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseStamp {
    pub owner: Option<String>,
    pub acquired_at: Option<i64>,
}

impl LeaseStamp {
    /// Returns `true` if nobody has ever leased the record.
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

/// One persisted upload job.
///
/// Decoding accepts the current snake_case shape as well as older
/// camelCase and `run_count`/`lock_owner` shapes. A record may carry several
/// spellings of one field; the newest spelling wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Schema version as read from disk (1 for unversioned legacy records).
    pub version: u32,
    pub repo_path: PathBuf,
    pub branch: String,
    pub file_path_and_urls: Targets,
    pub attempt_count: u32,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
}

/// Accepted spellings per field, canonical name first.
const FIELD_SPELLINGS: &[&[&str]] = &[
    &["repo_path", "repoPath"],
    &["file_path_and_urls", "filePathAndUrls"],
    &["attempt_count", "run_count", "runCount"],
    &["locked_by", "lockedBy", "lock_owner"],
    &["locked_at", "lockedAt", "lock_time"],
];

/// Current on-disk field names, after [`canonicalize`].
#[derive(Deserialize)]
struct StoredShape {
    #[serde(default = "legacy_version")]
    version: u32,
    repo_path: PathBuf,
    branch: String,
    #[serde(deserialize_with = "deserialize_targets")]
    file_path_and_urls: Targets,
    #[serde(default)]
    attempt_count: u32,
    #[serde(default)]
    locked_by: Option<String>,
    #[serde(default, deserialize_with = "deserialize_millis")]
    locked_at: Option<i64>,
}

fn legacy_version() -> u32 {
    1
}

/// Folds every spelling of a field into its canonical key. The first
/// non-null spelling wins and the others are discarded.
fn canonicalize(map: &mut Map<String, Value>) {
    for spellings in FIELD_SPELLINGS {
        let mut found = None;
        for key in *spellings {
            match map.remove(*key) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    found.get_or_insert(value);
                }
            }
        }
        if let Some(value) = found {
            map.insert(spellings[0].to_string(), value);
        }
    }
}

impl<'de> Deserialize<'de> for JobRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;
        canonicalize(&mut map);
        let shape: StoredShape =
            serde_json::from_value(Value::Object(map)).map_err(de::Error::custom)?;
        Ok(Self {
            version: shape.version,
            repo_path: shape.repo_path,
            branch: shape.branch,
            file_path_and_urls: shape.file_path_and_urls,
            attempt_count: shape.attempt_count,
            locked_by: shape.locked_by,
            locked_at: shape.locked_at,
        })
    }
}

impl JobRecord {
    /// Creates a fresh, unleased record at attempt 0.
    pub fn new(repo_path: impl Into<PathBuf>, branch: impl Into<String>, targets: Targets) -> Self {
        Self {
            version: SCHEMA_VERSION,
            repo_path: repo_path.into(),
            branch: branch.into(),
            file_path_and_urls: targets,
            attempt_count: 0,
            locked_by: None,
            locked_at: None,
        }
    }

    /// Parses a record from its on-disk bytes, accepting legacy shapes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serializes the record in the current schema.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Checks the fields serde cannot: absolute repo path, non-empty branch,
    /// and a schema version this build understands.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.version > SCHEMA_VERSION {
            return Err(RecordError::NewerSchema(self.version));
        }
        if !self.repo_path.is_absolute() {
            return Err(RecordError::RelativeRepoPath(
                self.repo_path.display().to_string(),
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(RecordError::EmptyBranch);
        }
        Ok(())
    }

    /// Returns `true` if the record was read from a pre-versioned shape.
    pub fn is_legacy(&self) -> bool {
        self.version < SCHEMA_VERSION
    }

    /// Returns the relative paths and targets of this job.
    pub fn targets(&self) -> &Targets {
        &self.file_path_and_urls
    }

    /// Number of file entries.
    pub fn len(&self) -> usize {
        self.file_path_and_urls.len()
    }

    /// Returns `true` if the record has no entries left.
    pub fn is_empty(&self) -> bool {
        self.file_path_and_urls.is_empty()
    }

    /// Current lease stamp. Blank owners count as no lease.
    pub fn lease_stamp(&self) -> LeaseStamp {
        match self.locked_by.as_deref() {
            Some(owner) if !owner.trim().is_empty() => LeaseStamp {
                owner: Some(owner.to_string()),
                acquired_at: self.locked_at,
            },
            _ => LeaseStamp::default(),
        }
    }

    /// Takes (or renews) the lease for `owner` at `now_ms`.
    pub fn set_lease(&mut self, owner: &str, now_ms: i64) {
        self.locked_by = Some(owner.to_string());
        self.locked_at = Some(now_ms);
    }

    /// Drops the lease so any instance may pick the job up.
    pub fn clear_lease(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }
}

/// Borrowed view that always serializes as the current schema.
#[derive(Serialize)]
struct CurrentShape<'a> {
    version: u32,
    repo_path: &'a Path,
    branch: &'a str,
    file_path_and_urls: &'a Targets,
    attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_at: Option<i64>,
}

impl Serialize for JobRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let stamp = self.lease_stamp();
        CurrentShape {
            version: SCHEMA_VERSION,
            repo_path: &self.repo_path,
            branch: &self.branch,
            file_path_and_urls: &self.file_path_and_urls,
            attempt_count: self.attempt_count,
            locked_by: self.locked_by.as_deref().filter(|_| stamp.owner.is_some()),
            locked_at: self.locked_at.filter(|_| stamp.owner.is_some()),
        }
        .serialize(serializer)
    }
}

/// Parses a bare `{ "<rel path>": target | null }` map, decoding targets
/// the same way a job record does.
pub fn targets_from_json(bytes: &[u8]) -> Result<Targets, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let targets = deserialize_targets(&mut deserializer)?;
    deserializer.end()?;
    Ok(targets)
}

fn deserialize_targets<'de, D>(deserializer: D) -> Result<Targets, D::Error>
where
    D: Deserializer<'de>,
{
    Map::<String, Value>::deserialize(deserializer).map(targets_from_map)
}

fn targets_from_map(raw: Map<String, Value>) -> Targets {
    raw.into_iter()
        .map(|(path, value)| (path, target_from_value(value)))
        .collect()
}

/// Decodes one target. Anything without a non-blank `url` is "no target".
fn target_from_value(value: Value) -> Option<PresignedTarget> {
    let Value::Object(mut map) = value else {
        return None;
    };
    let url = match map.remove("url") {
        Some(Value::String(url)) if !url.trim().is_empty() => url,
        _ => return None,
    };
    let fields = match map.remove("fields") {
        Some(Value::Object(fields)) => fields
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    Some(PresignedTarget { url, fields })
}

/// Accepts epoch milliseconds as an integer, a float or a numeric string.
fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}
