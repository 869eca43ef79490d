use super::*;
use crate::{conflict_winner, resolve_conflict, ConflictPolicy, RecordId, Winner};

fn edit_of(h: &Harness, local_offset_secs: i64) -> i64 {
    let id = h.repo.insert_row(&session("u1"));
    let mut edited = h.repo.row(id).unwrap();
    edited.store_name = "Edited".to_string();
    edited.updated_at = base_time() + Duration::seconds(local_offset_secs);
    assert_eq!(h.buffer.enqueue(&edited).unwrap(), RecordId::Remote(id));
    id
}

#[test]
fn newer_local_wins() {
    let mut local = session("u1");
    let remote = session("u1");
    local.updated_at = base_time() + Duration::seconds(1);
    local.store_name = "Local".to_string();

    assert_eq!(conflict_winner(&local, &remote), Winner::Local);
    assert_eq!(resolve_conflict(&local, &remote).store_name, "Local");
}

#[test]
fn tie_goes_to_remote() {
    let mut local = session("u1");
    let remote = session("u1");
    local.store_name = "Local".to_string();

    assert_eq!(conflict_winner(&local, &remote), Winner::Remote);
    assert_eq!(resolve_conflict(&local, &remote).store_name, "Store");
}

#[test]
fn older_local_loses() {
    let mut local = session("u1");
    local.updated_at = base_time() - Duration::seconds(30);
    assert_eq!(conflict_winner(&local, &session("u1")), Winner::Remote);
}

#[test]
fn newer_offline_edit_is_applied() {
    let h = harness(true);
    let id = edit_of(&h, 1);

    let report = h.engine.sync_pass().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.conflicts, 0);
    assert!(report.is_success());

    assert_eq!(h.repo.row(id).unwrap().store_name, "Edited");
    assert_eq!(
        h.repo.calls(),
        vec![format!("get:{}", id), format!("update:{}", id)]
    );
    assert!(h.buffer.pending().unwrap().is_empty());
}

#[test]
fn stale_offline_edit_is_dropped() {
    let h = harness(true);
    let id = edit_of(&h, 0);

    let report = h.engine.sync_pass().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.purged, 1);
    assert!(report.is_success());

    assert_eq!(h.repo.row(id).unwrap().store_name, "Store");
    assert_eq!(h.repo.calls(), vec![format!("get:{}", id)]);
    assert!(h.buffer.pending().unwrap().is_empty());
    assert!(h.engine.take_conflicts().is_empty());
}

#[test]
fn surfaced_conflict_stays_pending() {
    let h = harness(true);
    let engine = SyncEngine::new(h.repo.clone(), h.buffer.clone(), h.network.clone())
        .with_policy(ConflictPolicy::Surface);
    let id = edit_of(&h, -10);

    let report = engine.sync_pass().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 0);
    assert!(!report.is_success());

    let conflicts = engine.take_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record, format!("remote:{}", id));
    assert!(engine.take_conflicts().is_empty());

    assert_eq!(h.repo.row(id).unwrap().store_name, "Store");
    assert_eq!(h.buffer.pending().unwrap()[0].0, RecordId::Remote(id));
}

#[test]
fn surface_policy_still_applies_newer_edits() {
    let h = harness(true);
    let engine = SyncEngine::new(h.repo.clone(), h.buffer.clone(), h.network.clone())
        .with_policy(ConflictPolicy::Surface);
    let id = edit_of(&h, 5);

    assert!(engine.sync_once());
    assert!(engine.take_conflicts().is_empty());
    assert_eq!(h.repo.row(id).unwrap().store_name, "Edited");
}

#[test]
fn repeated_conflict_is_recorded_once() {
    let h = harness(true);
    let engine = SyncEngine::new(h.repo.clone(), h.buffer.clone(), h.network.clone())
        .with_policy(ConflictPolicy::Surface);
    let id = edit_of(&h, 0);

    for _ in 0..3 {
        assert!(!engine.sync_once());
    }

    let conflicts = engine.take_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record, format!("remote:{}", id));
}

#[test]
fn fetched_then_edited_offline_session_is_applied() {
    let h = harness(false);
    let id = h.repo.insert_row(&session("u1"));

    let mut edited = h.repo.row(id).unwrap();
    edited.machine_name = "Edited".to_string();
    assert_eq!(
        h.engine.save_or_enqueue(&mut edited).unwrap(),
        crate::SaveOutcome::Buffered(RecordId::Remote(id))
    );

    h.network.set_online(true);
    let report = h.engine.sync_pass().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(h.repo.row(id).unwrap().machine_name, "Edited");
}
