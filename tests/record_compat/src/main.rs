fn main() {
    println!("Run `cargo test -p record-compat` to execute record compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use treesync_protocol::constants::SCHEMA_VERSION;
    use treesync_protocol::{JobRecord, RecordError};
    use treesync_store::{JobId, JobStore, StoreError};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_bytes(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_record(name: &str) -> JobRecord {
        JobRecord::from_json(&load_bytes(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Parses a fixture, re-serializes it and compares the JSON values.
    fn roundtrip_test(name: &str) {
        let fixture: serde_json::Value = serde_json::from_slice(&load_bytes(name)).unwrap();
        let record = load_record(name);
        let reserialized: serde_json::Value =
            serde_json::from_slice(&record.to_json().unwrap()).unwrap();
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  disk:  {fixture}\n  write: {reserialized}"
        );
    }

    // --- Current schema ---

    #[test]
    fn fixture_record_v2_roundtrips() {
        roundtrip_test("record_v2.json");
    }

    #[test]
    fn fixture_record_v2_unleased_roundtrips() {
        roundtrip_test("record_v2_unleased.json");
    }

    #[test]
    fn fixture_record_v2_fields() {
        let record = load_record("record_v2.json");
        assert!(record.validate().is_ok());
        assert!(!record.is_legacy());
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.len(), 2);
        assert!(record.targets()["old/removed.txt"].is_none());

        let logo = record.targets()["assets/logo.png"].as_ref().unwrap();
        assert_eq!(logo.fields.len(), 4);
        assert_eq!(logo.fields["key"], "u/42/assets/logo.png");

        let stamp = record.lease_stamp();
        assert_eq!(stamp.acquired_at, Some(1_718_000_000_123));
        assert!(stamp.owner.unwrap().starts_with("laptop-"));
    }

    // --- Legacy shapes ---

    #[test]
    fn fixture_legacy_snake() {
        let record = load_record("legacy_snake.json");
        assert!(record.is_legacy());
        assert!(record.validate().is_ok());
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.locked_by.as_deref(), Some("desktop-01"));
        assert_eq!(record.locked_at, Some(1_718_000_000_000));

        let readme = record.targets()["README.md"].as_ref().unwrap();
        assert_eq!(readme.fields["success_action_status"], "201");
        for rel in ["docs/empty.md", "docs/blank.md", "docs/no-url.md"] {
            assert!(record.targets()[rel].is_none(), "{rel} should have no target");
        }
    }

    #[test]
    fn fixture_legacy_camel() {
        let record = load_record("legacy_camel.json");
        assert!(record.is_legacy());
        assert_eq!(record.repo_path, PathBuf::from("/Users/dev/notes"));
        assert_eq!(record.attempt_count, 1);
        // A blank owner is no lease at all.
        assert!(record.lease_stamp().is_free());
    }

    #[test]
    fn fixture_legacy_mixed_keys() {
        let record = load_record("legacy_mixed_keys.json");
        assert!(record.is_legacy());
        assert!(record.validate().is_ok());
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.len(), 2);
        assert_eq!(record.locked_by.as_deref(), Some("desktop-01"));
        assert_eq!(record.locked_at, Some(1_718_000_000_000));
        assert!(record.targets()["notes/todo.md"].is_none());
    }

    #[test]
    fn legacy_records_are_written_in_current_schema() {
        for name in ["legacy_snake.json", "legacy_camel.json", "legacy_mixed_keys.json"] {
            let record = load_record(name);
            let written: serde_json::Value =
                serde_json::from_slice(&record.to_json().unwrap()).unwrap();
            let obj = written.as_object().unwrap();

            assert_eq!(obj["version"], SCHEMA_VERSION, "{name}");
            assert_eq!(obj["attempt_count"], record.attempt_count, "{name}");
            for legacy_key in ["run_count", "runCount", "repoPath", "lock_owner", "lockedBy"] {
                assert!(!obj.contains_key(legacy_key), "{name} kept {legacy_key}");
            }

            let reread = JobRecord::from_json(&record.to_json().unwrap()).unwrap();
            assert!(!reread.is_legacy());
            assert_eq!(reread.targets(), record.targets());
            assert_eq!(reread.lease_stamp(), record.lease_stamp());
        }
    }

    // --- Rejected shapes ---

    #[test]
    fn fixture_missing_branch_does_not_parse() {
        assert!(JobRecord::from_json(&load_bytes("invalid_missing_branch.json")).is_err());
    }

    #[test]
    fn fixture_relative_repo_fails_validation() {
        let record = load_record("invalid_relative_repo.json");
        assert!(matches!(
            record.validate(),
            Err(RecordError::RelativeRepoPath(_))
        ));
    }

    #[test]
    fn fixture_newer_schema_is_recognised() {
        let record = load_record("newer_schema.json");
        assert!(matches!(record.validate(), Err(RecordError::NewerSchema(3))));
    }

    // --- Through the store ---

    #[tokio::test]
    async fn store_reads_every_fixture_it_can_parse() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        let cases = [
            ("1718000000001-00000001", "record_v2.json", true),
            ("1718000000002-00000002", "legacy_snake.json", true),
            ("1718000000003-00000003", "legacy_camel.json", true),
            ("1718000000004-00000004", "invalid_missing_branch.json", false),
            ("1718000000005-00000005", "legacy_mixed_keys.json", true),
        ];
        for (id, fixture, _) in &cases {
            fs::write(dir.path().join(format!("{id}.json")), load_bytes(fixture)).unwrap();
        }

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), cases.len());
        for (id, fixture, readable) in cases {
            let id: JobId = id.parse().unwrap();
            match store.read(&id).await {
                Ok(_) => assert!(readable, "{fixture} should not parse"),
                Err(StoreError::Malformed { .. }) => assert!(!readable, "{fixture} should parse"),
                Err(e) => panic!("unexpected error for {fixture}: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn store_rewrite_migrates_legacy_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let id: JobId = "1718000000002-00000002".parse().unwrap();
        let path = dir.path().join(format!("{id}.json"));
        fs::write(&path, load_bytes("legacy_snake.json")).unwrap();

        let mut record = store.read(&id).await.unwrap();
        let observed = record.lease_stamp();
        record.set_lease("adopter", 1_718_000_999_000);
        store.compare_and_write(&id, &observed, &record).await.unwrap();

        let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["version"], SCHEMA_VERSION);
        assert_eq!(on_disk["attempt_count"], 3);
        assert_eq!(on_disk["locked_by"], "adopter");
        assert!(on_disk.get("run_count").is_none());
    }
}
