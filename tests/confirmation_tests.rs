mod common;

use chrono::Utc;
use common::*;
use fsbatch::audit::AuditAction;
use fsbatch::{BatchItem, BatchRequest, EngineError, ExecuteOutcome, OpKind};

fn held_delete(t: &TestEngine, count: usize) -> uuid::Uuid {
    let files = make_files(&t.work, "pending", "tmp", count);
    let items = files.iter().map(BatchItem::new).collect();
    let req = BatchRequest::new(OpKind::Delete, "session", items);
    let op_id = req.id;
    match t.engine.execute(req).unwrap() {
        ExecuteOutcome::AwaitingConfirmation { .. } => op_id,
        ExecuteOutcome::Executed(_) => panic!("delete must be held"),
    }
}

#[test]
fn test_delete_never_executes_without_confirmation() {
    let t = test_engine();
    let op_id = held_delete(&t, 2);

    assert_eq!(t.engine.pending_confirmation_count(), 1);
    assert!(t.work.join("pending0.tmp").exists());
    assert!(t.work.join("pending1.tmp").exists());

    // No EXECUTED record exists for the held batch.
    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    assert!(records.iter().all(|r| r.action != AuditAction::Executed));
}

#[test]
fn test_wrong_token_is_rejected_and_batch_stays_held() {
    let t = test_engine();
    let op_id = held_delete(&t, 2);

    let err = t.engine.confirm(op_id, "yes").unwrap_err();
    assert!(matches!(err, EngineError::TokenMismatch(_)));
    assert!(t.work.join("pending0.tmp").exists());

    // The right phrase still goes through afterwards.
    let summary = t.engine.confirm(op_id, "confirm delete").unwrap();
    assert_eq!(summary.succeeded, 2);
}

#[test]
fn test_duplicate_confirm_is_already_resolved() {
    let t = test_engine();
    let op_id = held_delete(&t, 1);

    t.engine.confirm(op_id, "confirm delete").unwrap();
    let err = t.engine.confirm(op_id, "confirm delete").unwrap_err();
    assert!(matches!(err, EngineError::AlreadyResolved(_)));

    // And the batch did not run twice: the file is in trash, not
    // double-processed.
    assert!(!t.work.join("pending0.tmp").exists());
}

#[test]
fn test_deny_discards_the_batch() {
    let t = test_engine();
    let op_id = held_delete(&t, 2);

    t.engine.deny(op_id).unwrap();
    assert_eq!(t.engine.pending_confirmation_count(), 0);
    assert!(t.work.join("pending0.tmp").exists());

    let err = t.engine.confirm(op_id, "confirm delete").unwrap_err();
    assert!(matches!(err, EngineError::AlreadyResolved(_)));

    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    assert!(records.iter().any(|r| r.action == AuditAction::Denied));
}

#[test]
fn test_stale_confirmation_for_superseded_request() {
    let t = test_engine();
    let old_id = held_delete(&t, 1);
    let _new_id = held_delete(&t, 1);

    let err = t.engine.confirm(old_id, "confirm delete").unwrap_err();
    assert!(matches!(err, EngineError::StaleConfirmation(..)));
}

#[test]
#[cfg(unix)]
fn test_fully_protected_delete_is_denied_up_front() {
    let t = test_engine();
    let req = BatchRequest::new(
        OpKind::Delete,
        "session",
        vec![BatchItem::new("/etc/hosts"), BatchItem::new("/etc/passwd")],
    );
    let op_id = req.id;

    // Nothing admissible remains, so there is nothing to confirm: the
    // batch is reported failed immediately instead of being held.
    let summary = match t.engine.execute(req).unwrap() {
        ExecuteOutcome::Executed(s) => s,
        ExecuteOutcome::AwaitingConfirmation { .. } => {
            panic!("all-protected batch must not be held")
        }
    };
    assert_eq!(summary.failed, 2);
    assert_eq!(t.engine.pending_confirmation_count(), 0);

    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    let item_denied = records
        .iter()
        .filter(|r| r.action == AuditAction::Denied && r.item_index.is_some())
        .count();
    assert_eq!(item_denied, 2);
}

#[test]
#[cfg(unix)]
fn test_protected_items_denied_before_the_hold() {
    let t = test_engine();
    let files = make_files(&t.work, "mix", "tmp", 2);
    let mut items: Vec<BatchItem> = files.iter().map(BatchItem::new).collect();
    items.push(BatchItem::new("/etc/hosts"));
    let req = BatchRequest::new(OpKind::Delete, "session", items);
    let op_id = req.id;

    let prompt = match t.engine.execute(req).unwrap() {
        ExecuteOutcome::AwaitingConfirmation { prompt, .. } => prompt,
        ExecuteOutcome::Executed(_) => panic!("delete must be held"),
    };
    // The prompt counts only what will actually run.
    assert!(prompt.contains("2 file(s)"), "got: {prompt}");

    // The protected item's denial is on record while the batch is still
    // held, and denying the batch adds no further item records.
    let denied_for = |records: &[fsbatch::audit::AuditRecord]| {
        records
            .iter()
            .filter(|r| r.action == AuditAction::Denied && r.item_index == Some(2))
            .count()
    };
    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    assert_eq!(denied_for(&records), 1);

    t.engine.deny(op_id).unwrap();
    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    assert_eq!(denied_for(&records), 1);
    assert!(t.work.join("mix0.tmp").exists());
}

#[test]
#[cfg(unix)]
fn test_confirmed_run_does_not_duplicate_denied_records() {
    let t = test_engine();
    let files = make_files(&t.work, "dup", "tmp", 2);
    let mut items: Vec<BatchItem> = files.iter().map(BatchItem::new).collect();
    items.push(BatchItem::new("/etc/hosts"));
    let req = BatchRequest::new(OpKind::Delete, "session", items);
    let op_id = req.id;

    t.engine.execute(req).unwrap();
    let summary = t.engine.confirm(op_id, "confirm delete").unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    let item_denied = records
        .iter()
        .filter(|r| r.action == AuditAction::Denied && r.item_index.is_some())
        .count();
    assert_eq!(item_denied, 1);
    // The two admissible items each carry one EXECUTED record, plus the
    // batch summary.
    let executed = records
        .iter()
        .filter(|r| r.action == AuditAction::Executed)
        .count();
    assert_eq!(executed, 3);
}

#[test]
fn test_confirmed_flow_is_fully_audited() {
    let t = test_engine();
    let op_id = held_delete(&t, 3);
    t.engine.confirm(op_id, "confirm delete").unwrap();

    let records = t.engine.audit().records_for(Utc::now().date_naive()).unwrap();
    let for_op: Vec<_> = records
        .iter()
        .filter(|r| r.operation_id == op_id)
        .collect();

    assert!(for_op.iter().any(|r| r.action == AuditAction::Requested));
    assert!(for_op.iter().any(|r| r.action == AuditAction::Confirmed));
    let executed = for_op
        .iter()
        .filter(|r| r.action == AuditAction::Executed)
        .count();
    assert_eq!(executed, 4); // 3 items + 1 batch summary
}
