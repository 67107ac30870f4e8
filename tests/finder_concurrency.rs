//! Cross-thread locking behavior of the recompute pass.
//!
//! Two finders over the same database and lock directory, one with an
//! artificially stretched write pass. The second caller must back off until
//! the first releases the event lock, and no reader may ever observe a torn
//! pass (some values refreshed, others still stale).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventdesk::container::CustomFieldValueCollection;
use eventdesk::custom_field::{CustomField, CustomFieldType};
use eventdesk::db::{EventDb, ValueOwner};
use eventdesk::finder::RelatedParticipantsFinder;
use eventdesk::locker::EventLocker;
use eventdesk::value::{CustomFieldValue, ParticipantDetectingValue};

fn seed(db: &EventDb) -> (i64, CustomField, Vec<ValueOwner>) {
    let event_id = db.insert_event("Summer camp").expect("insert event");
    db.insert_participant(event_id, "Anna", "Muster").unwrap();
    db.insert_participant(event_id, "Ben", "Muster").unwrap();
    db.insert_custom_field(event_id, "Sibling", CustomFieldType::ParticipantDetecting)
        .unwrap();
    let field = db
        .list_participant_detecting_fields(event_id)
        .unwrap()
        .remove(0);

    let mut owners = Vec::new();
    for (owner_id, first) in [(101, "Anna"), (102, "Ben"), (103, "Annemarie")] {
        let owner = ValueOwner::participant(owner_id, event_id);
        let mut collection = CustomFieldValueCollection::new();
        let container = collection.get_by_field(&field);
        container
            .set_value(CustomFieldValue::ParticipantDetecting(
                ParticipantDetectingValue {
                    related_first_name: first.to_string(),
                    related_last_name: "Muster".to_string(),
                    ..Default::default()
                },
            ))
            .unwrap();
        db.save_container(owner, container).unwrap();
        owners.push(owner);
    }
    (event_id, field, owners)
}

fn fresh_count(db: &EventDb, field: &CustomField, owners: &[ValueOwner]) -> usize {
    owners
        .iter()
        .filter(|owner| {
            match db
                .load_container(**owner, field)
                .expect("load container")
                .expect("stored container")
                .value()
            {
                CustomFieldValue::ParticipantDetecting(d) => {
                    d.proposed_participant_ids.is_some()
                }
                other => panic!("wrong variant: {other:?}"),
            }
        })
        .count()
}

#[test]
fn concurrent_ensure_calls_never_interleave_writes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("eventdesk.db");
    let locker = EventLocker::new(dir.path());

    let setup_db = EventDb::open_at(&db_path).expect("open db");
    let (event_id, field, owners) = seed(&setup_db);
    drop(setup_db);

    let stop = Arc::new(AtomicBool::new(false));

    // Slow writer: holds the event lock with a stretched pass.
    let slow = {
        let db_path = db_path.clone();
        let locker = locker.clone();
        thread::spawn(move || {
            let db = EventDb::open_at(&db_path).expect("open db");
            RelatedParticipantsFinder::new(&db, locker)
                .with_pass_delay(Duration::from_millis(600))
                .ensure_proposals(event_id)
                .expect("slow ensure");
        })
    };

    // Contender: starts while the slow pass is underway and must back off
    // behind the lock instead of writing concurrently.
    let contender = {
        let db_path = db_path.clone();
        let locker = locker.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let db = EventDb::open_at(&db_path).expect("open db");
            RelatedParticipantsFinder::new(&db, locker)
                .ensure_proposals(event_id)
                .expect("contending ensure");
        })
    };

    // Observer: while the race runs, freshness must only ever be all-or-nothing.
    let observer = {
        let db_path = db_path.clone();
        let field = field.clone();
        let owners = owners.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let db = EventDb::open_at(&db_path).expect("open db");
            while !stop.load(Ordering::Relaxed) {
                let fresh = fresh_count(&db, &field, &owners);
                assert!(
                    fresh == 0 || fresh == owners.len(),
                    "observed torn pass: {fresh} of {} values fresh",
                    owners.len()
                );
                thread::sleep(Duration::from_millis(20));
            }
        })
    };

    slow.join().expect("slow thread");
    contender.join().expect("contender thread");
    stop.store(true, Ordering::Relaxed);
    observer.join().expect("observer thread");

    // Both calls completed; the lock file is gone and the state is fully fresh.
    assert!(!dir
        .path()
        .join(format!("_related_participants_finder_{event_id}.lock"))
        .exists());

    let db = EventDb::open_at(&db_path).expect("open db");
    assert_eq!(fresh_count(&db, &field, &owners), owners.len());

    // Auto-selection landed for the exact names and not for the near miss.
    let pool = db.list_participants(event_id).unwrap();
    let anna = pool.iter().find(|p| p.first_name == "Anna").unwrap().id;
    let ben = pool.iter().find(|p| p.first_name == "Ben").unwrap().id;
    let detecting = |owner: &ValueOwner| match db
        .load_container(*owner, &field)
        .unwrap()
        .unwrap()
        .value()
    {
        CustomFieldValue::ParticipantDetecting(d) => d.clone(),
        other => panic!("wrong variant: {other:?}"),
    };
    assert_eq!(detecting(&owners[0]).selected_participant_id, Some(anna));
    assert!(detecting(&owners[0]).system_selection);
    assert_eq!(detecting(&owners[1]).selected_participant_id, Some(ben));
    assert_eq!(detecting(&owners[2]).selected_participant_id, None);
}

#[test]
fn second_call_after_completion_is_a_fast_no_op() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("eventdesk.db");
    let locker = EventLocker::new(dir.path());

    let db = EventDb::open_at(&db_path).expect("open db");
    let (event_id, field, owners) = seed(&db);

    let finder = RelatedParticipantsFinder::new(&db, locker.clone());
    finder.ensure_proposals(event_id).expect("first ensure");
    assert_eq!(fresh_count(&db, &field, &owners), owners.len());

    // Freshness short-circuits before any lock attempt, so a held lock
    // cannot delay the call.
    let held = match locker.acquire(event_id).expect("acquire") {
        eventdesk::locker::Acquired::Held(h) => h,
        eventdesk::locker::Acquired::Unavailable => panic!("lock should be free"),
    };
    let started = std::time::Instant::now();
    finder.ensure_proposals(event_id).expect("second ensure");
    assert!(started.elapsed() < Duration::from_millis(200));
    locker.release(held);
}
