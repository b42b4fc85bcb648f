#[cfg(test)]
mod tests {
    use crate::infrastructure::LockStore;
    use crate::infrastructure_in_memory::InMemoryLockStore;
    use crate::types::{Acquisition, EntityId, HolderId, Lock, LockDraft, LockFilter, LockId, LockType};
    use std::sync::Arc;

    const NOW: u64 = 1_000;

    fn draft(holder: &str, entity: u64, lock_type: LockType, expires_at: u64) -> LockDraft {
        LockDraft {
            holder_id: HolderId::new(holder),
            entity_id: EntityId(entity),
            lock_type,
            expires_at,
        }
    }

    fn created(acquisition: Acquisition) -> Lock {
        match acquisition {
            Acquisition::Created(lock) => lock,
            Acquisition::Conflict(blocking) => panic!("Expected Created, blocked by {:?}", blocking),
        }
    }

    // =========================================================================
    // Shared contract, run against every backend
    // =========================================================================

    fn create_and_query(store: &dyn LockStore) {
        let lock = created(store.create(draft("a", 1, LockType::Read, NOW + 5000), NOW).unwrap());
        assert!(lock.id.as_str().starts_with("lock_"));

        let found = store.query(&LockFilter::active().entity(EntityId(1)), NOW).unwrap();
        assert_eq!(found, vec![lock]);

        assert!(store.query(&LockFilter::active().entity(EntityId(2)), NOW).unwrap().is_empty());
    }

    fn create_rejects_conflicts(store: &dyn LockStore) {
        created(store.create(draft("a", 5, LockType::Write, NOW + 5000), NOW).unwrap());

        match store.create(draft("b", 5, LockType::Read, NOW + 5000), NOW).unwrap() {
            Acquisition::Conflict(blocking) => {
                assert_eq!(blocking.len(), 1);
                assert_eq!(blocking[0].holder_id, HolderId::new("a"));
            }
            Acquisition::Created(_) => panic!("Expected Conflict"),
        }
        assert_eq!(store.query(&LockFilter::any(), NOW).unwrap().len(), 1);
    }

    fn expired_rows_are_invisible_but_kept(store: &dyn LockStore) {
        created(store.create(draft("a", 2, LockType::Write, NOW + 10), NOW).unwrap());
        let later = NOW + 10;

        assert!(store.query(&LockFilter::active(), later).unwrap().is_empty());
        assert_eq!(store.query(&LockFilter::expired(), later).unwrap().len(), 1);

        // An expired write does not block a new writer
        created(store.create(draft("b", 2, LockType::Write, later + 100), later).unwrap());
        assert_eq!(store.query(&LockFilter::any(), later).unwrap().len(), 2);
    }

    fn filters_are_conjunctive(store: &dyn LockStore) {
        let a1 = created(store.create(draft("a", 1, LockType::Read, NOW + 100), NOW).unwrap());
        created(store.create(draft("b", 1, LockType::Read, NOW + 100), NOW).unwrap());
        created(store.create(draft("a", 2, LockType::Write, NOW + 100), NOW).unwrap());

        let filter = LockFilter::active()
            .entity(EntityId(1))
            .holder(HolderId::new("a"))
            .lock_type(Some(LockType::Read));
        assert_eq!(store.query(&filter, NOW).unwrap(), vec![a1.clone()]);

        let by_id = LockFilter::any().ids([a1.id.clone()]);
        assert_eq!(store.query(&by_id, NOW).unwrap(), vec![a1]);

        let none = LockFilter::any().ids(Vec::<LockId>::new());
        assert!(store.query(&none, NOW).unwrap().is_empty());
    }

    fn delete_and_update(store: &dyn LockStore) {
        created(store.create(draft("a", 1, LockType::Read, NOW + 100), NOW).unwrap());
        created(store.create(draft("b", 1, LockType::Read, NOW + 100), NOW).unwrap());

        let mine = LockFilter::active().holder(HolderId::new("a"));
        assert_eq!(store.update_expiry(&mine, NOW + 9000, NOW).unwrap(), 1);
        let refreshed = store.query(&mine, NOW).unwrap();
        assert_eq!(refreshed[0].expires_at, NOW + 9000);

        assert_eq!(store.delete(&mine, NOW).unwrap(), 1);
        let rest = store.query(&LockFilter::any(), NOW).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].holder_id, HolderId::new("b"));
    }

    fn purge_removes_only_expired(store: &dyn LockStore) {
        created(store.create(draft("a", 1, LockType::Read, NOW + 10), NOW).unwrap());
        created(store.create(draft("a", 2, LockType::Read, NOW + 5000), NOW).unwrap());

        assert_eq!(store.purge_expired(NOW + 100).unwrap(), 1);
        let rest = store.query(&LockFilter::any(), NOW + 100).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].entity_id, EntityId(2));
    }

    fn entity_ids_above_i64_max_stay_distinct(store: &dyn LockStore) {
        let high = 1u64 << 63;
        let a = created(store.create(draft("a", high, LockType::Write, NOW + 5000), NOW).unwrap());
        let b = created(store.create(draft("b", high + 1, LockType::Write, NOW + 5000), NOW).unwrap());
        created(store.create(draft("c", u64::MAX, LockType::Write, NOW + 5000), NOW).unwrap());

        assert_eq!(store.query(&LockFilter::active().entity(EntityId(high)), NOW).unwrap(), vec![a]);
        assert_eq!(
            store.query(&LockFilter::active().entity(EntityId(high + 1)), NOW).unwrap(),
            vec![b]
        );

        // Same entity, different holder: still exclusive
        match store.create(draft("d", high, LockType::Write, NOW + 5000), NOW).unwrap() {
            Acquisition::Conflict(blocking) => assert_eq!(blocking[0].holder_id, HolderId::new("a")),
            Acquisition::Created(_) => panic!("Expected Conflict"),
        }

        let mut entities: Vec<u64> = store
            .query(&LockFilter::any(), NOW)
            .unwrap()
            .into_iter()
            .map(|l| l.entity_id.0)
            .collect();
        entities.sort_unstable();
        assert_eq!(entities, vec![high, high + 1, u64::MAX]);
    }

    // =========================================================================
    // In-memory
    // =========================================================================

    #[test]
    fn test_in_memory_create_and_query() {
        create_and_query(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_create_rejects_conflicts() {
        create_rejects_conflicts(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_expired_rows() {
        expired_rows_are_invisible_but_kept(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_filters() {
        filters_are_conjunctive(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_delete_and_update() {
        delete_and_update(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_purge() {
        purge_removes_only_expired(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_large_entity_ids() {
        entity_ids_above_i64_max_stay_distinct(&InMemoryLockStore::new());
    }

    #[test]
    fn test_in_memory_concurrent_writers_one_wins() {
        let store = Arc::new(InMemoryLockStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let holder = format!("h{}", i);
                    matches!(
                        store.create(draft(&holder, 42, LockType::Write, NOW + 5000), NOW),
                        Ok(Acquisition::Created(_))
                    )
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    // =========================================================================
    // SQLite
    // =========================================================================

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use super::*;
        use crate::infrastructure_sqlite::SqliteLockStore;

        fn temp_store() -> (tempfile::TempDir, SqliteLockStore) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("locks.db");
            let store = SqliteLockStore::open(path.to_str().unwrap()).unwrap();
            (dir, store)
        }

        #[test]
        fn test_sqlite_create_and_query() {
            create_and_query(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_create_rejects_conflicts() {
            create_rejects_conflicts(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_expired_rows() {
            expired_rows_are_invisible_but_kept(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_filters() {
            filters_are_conjunctive(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_delete_and_update() {
            delete_and_update(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_purge() {
            purge_removes_only_expired(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_large_entity_ids() {
            entity_ids_above_i64_max_stay_distinct(&SqliteLockStore::open_in_memory().unwrap());
        }

        #[test]
        fn test_sqlite_locks_survive_reopen() {
            let (dir, store) = temp_store();
            let lock = created(store.create(draft("a", 1, LockType::Write, NOW + 5000), NOW).unwrap());
            drop(store);

            let path = dir.path().join("locks.db");
            let reopened = SqliteLockStore::open(path.to_str().unwrap()).unwrap();
            assert_eq!(reopened.query(&LockFilter::active(), NOW).unwrap(), vec![lock]);
        }

        #[test]
        fn test_sqlite_separate_connections_one_writer_wins() {
            let (dir, _store) = temp_store();
            let path = dir.path().join("locks.db");

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let path = path.clone();
                    std::thread::spawn(move || {
                        let store = SqliteLockStore::open(path.to_str().unwrap()).unwrap();
                        let holder = format!("h{}", i);
                        matches!(
                            store.create(draft(&holder, 9, LockType::Write, NOW + 5000), NOW),
                            Ok(Acquisition::Created(_))
                        )
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
    }
}
