//! Per-job ownership between agent instances.
//!
//! A lease is the `(locked_by, locked_at)` pair on the record. It is taken
//! when dispatch starts, renewed on every chunk write, and honoured for
//! [`LEASE_TIMEOUT`](treesync_protocol::constants::LEASE_TIMEOUT) after its
//! last renewal.

use std::time::Duration;

use treesync_protocol::JobRecord;

/// Wall-clock time in epoch milliseconds, the unit of `locked_at`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// How a record's lease looks from one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// Nobody holds it.
    Free,
    /// This instance holds it.
    Owned,
    /// Another instance held it but stopped renewing.
    Expired { owner: String },
    /// Another instance holds a live lease.
    HeldElsewhere { owner: String, remaining: Duration },
}

/// Classifies `record`'s lease for `instance_id` at `now_ms`.
///
/// An owner without a timestamp cannot be aged and counts as expired. A
/// timestamp slightly ahead of the local clock counts as just renewed; one
/// more than a whole timeout ahead counts as expired.
pub fn assess(record: &JobRecord, instance_id: &str, now_ms: i64, timeout: Duration) -> LeaseStatus {
    let stamp = record.lease_stamp();
    let Some(owner) = stamp.owner else {
        return LeaseStatus::Free;
    };
    if owner == instance_id {
        return LeaseStatus::Owned;
    }
    let Some(acquired_at) = stamp.acquired_at else {
        return LeaseStatus::Expired { owner };
    };

    let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    if acquired_at > now_ms.saturating_add(timeout_ms) {
        return LeaseStatus::Expired { owner };
    }
    let age = now_ms.saturating_sub(acquired_at).max(0);
    if age >= timeout_ms {
        LeaseStatus::Expired { owner }
    } else {
        LeaseStatus::HeldElsewhere {
            owner,
            remaining: Duration::from_millis((timeout_ms - age) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_protocol::Targets;
    use treesync_protocol::constants::LEASE_TIMEOUT;

    const NOW: i64 = 1_700_000_000_000;

    fn leased(owner: Option<&str>, at: Option<i64>) -> JobRecord {
        let mut record = JobRecord::new("/repo", "main", Targets::new());
        record.locked_by = owner.map(String::from);
        record.locked_at = at;
        record
    }

    #[test]
    fn unleased_is_free() {
        let status = assess(&leased(None, None), "me", NOW, LEASE_TIMEOUT);
        assert_eq!(status, LeaseStatus::Free);
    }

    #[test]
    fn own_lease_is_owned_regardless_of_age() {
        let status = assess(&leased(Some("me"), Some(0)), "me", NOW, LEASE_TIMEOUT);
        assert_eq!(status, LeaseStatus::Owned);
    }

    #[test]
    fn live_foreign_lease_blocks() {
        let at = NOW - 60_000;
        let status = assess(&leased(Some("other"), Some(at)), "me", NOW, LEASE_TIMEOUT);
        assert_eq!(
            status,
            LeaseStatus::HeldElsewhere {
                owner: "other".into(),
                remaining: Duration::from_secs(4 * 60),
            }
        );
    }

    #[test]
    fn expired_foreign_lease_is_adoptable() {
        let at = NOW - LEASE_TIMEOUT.as_millis() as i64;
        let status = assess(&leased(Some("other"), Some(at)), "me", NOW, LEASE_TIMEOUT);
        assert_eq!(status, LeaseStatus::Expired { owner: "other".into() });
    }

    #[test]
    fn owner_without_time_is_expired() {
        let status = assess(&leased(Some("other"), None), "me", NOW, LEASE_TIMEOUT);
        assert!(matches!(status, LeaseStatus::Expired { .. }));
    }

    #[test]
    fn future_timestamp_counts_as_fresh() {
        let status = assess(
            &leased(Some("other"), Some(NOW + 10_000)),
            "me",
            NOW,
            LEASE_TIMEOUT,
        );
        assert_eq!(
            status,
            LeaseStatus::HeldElsewhere {
                owner: "other".into(),
                remaining: LEASE_TIMEOUT,
            }
        );
    }

    #[test]
    fn timestamp_beyond_a_whole_timeout_ahead_is_expired() {
        let timeout_ms = LEASE_TIMEOUT.as_millis() as i64;
        let status = assess(
            &leased(Some("skewed"), Some(NOW + timeout_ms + 1)),
            "me",
            NOW,
            LEASE_TIMEOUT,
        );
        assert_eq!(status, LeaseStatus::Expired { owner: "skewed".into() });

        let status = assess(
            &leased(Some("skewed"), Some(NOW + timeout_ms)),
            "me",
            NOW,
            LEASE_TIMEOUT,
        );
        assert!(matches!(status, LeaseStatus::HeldElsewhere { .. }));
    }
}
