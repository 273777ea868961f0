use std::fmt;
use std::str::FromStr;

use treesync_protocol::constants::JOB_FILE_EXTENSION;

use crate::StoreError;

/// Identity of a job record: `<epoch ms, 13 digits>-<8 hex random>`.
///
/// The random suffix keeps ids unique when several jobs are created within
/// the same millisecond. Ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Generates a new id for the current time.
    pub fn generate() -> Self {
        Self::from_parts(chrono::Utc::now().timestamp_millis(), rand::random::<u32>())
    }

    fn from_parts(millis: i64, suffix: u32) -> Self {
        Self(format!("{millis:013}-{suffix:08x}"))
    }

    /// Parses an id, returning `None` for anything not shaped like one.
    pub fn parse(s: &str) -> Option<Self> {
        let (millis, suffix) = s.split_once('-')?;
        let millis_ok = millis.len() >= 13 && millis.bytes().all(|b| b.is_ascii_digit());
        let suffix_ok = suffix.len() == 8
            && suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        (millis_ok && suffix_ok).then(|| Self(s.to_string()))
    }

    /// Parses a record file name (`<id>.json`).
    pub(crate) fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(JOB_FILE_EXTENSION)?.strip_suffix('.')?;
        Self::parse(stem)
    }

    /// Record file name for this id.
    pub(crate) fn file_name(&self) -> String {
        format!("{}.{JOB_FILE_EXTENSION}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| StoreError::InvalidId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = JobId::generate();
        assert_eq!(JobId::parse(id.as_str()), Some(id.clone()));
    }

    #[test]
    fn same_millisecond_ids_differ() {
        let a = JobId::from_parts(1_700_000_000_000, 1);
        let b = JobId::from_parts(1_700_000_000_000, 2);
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "1700000000000-00000001");
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let older = JobId::from_parts(1_600_000_000_000, u32::MAX);
        let newer = JobId::from_parts(1_700_000_000_000, 0);
        assert!(older < newer);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(JobId::parse("").is_none());
        assert!(JobId::parse("1700000000000").is_none());
        assert!(JobId::parse("1700000000000-xyz12345").is_none());
        assert!(JobId::parse("1700000000000-ABCDEF12").is_none());
        assert!(JobId::parse("17000-abcdef12").is_none());
        assert!(JobId::parse("../1700000000000-abcdef12").is_none());
        assert!("nope".parse::<JobId>().is_err());
    }

    #[test]
    fn file_name_round_trip() {
        let id = JobId::from_parts(1_700_000_000_000, 0xabcdef12);
        assert_eq!(id.file_name(), "1700000000000-abcdef12.json");
        assert_eq!(JobId::from_file_name(&id.file_name()), Some(id));
        assert!(JobId::from_file_name("1700000000000-abcdef12.json.tmp").is_none());
        assert!(JobId::from_file_name("1700000000000-abcdef12.yaml").is_none());
    }
}
