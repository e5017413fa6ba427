mod common;

use std::fs;

use chrono::Utc;
use common::*;
use fsbatch::audit::AuditAction;
use fsbatch::{BatchItem, BatchRequest, EngineError, ExecuteOutcome, OpKind};
use uuid::Uuid;

#[test]
fn test_delete_confirm_rollback_round_trip() {
    // The canonical flow: delete 23 temp files, confirm, then undo.
    let t = test_engine();
    let files = make_files(&t.work, "scratch", "tmp", 23);

    let items = files.iter().map(BatchItem::new).collect();
    let req = BatchRequest::new(OpKind::Delete, "session", items);
    let op_id = req.id;

    match t.engine.execute(req).unwrap() {
        ExecuteOutcome::AwaitingConfirmation { operation_id, prompt } => {
            assert_eq!(operation_id, op_id);
            assert!(prompt.contains("23"));
        }
        ExecuteOutcome::Executed(_) => panic!("delete must be held"),
    }

    let summary = t.engine.confirm(op_id, "confirm delete").unwrap();
    assert_eq!(summary.succeeded, 23);
    for f in &files {
        assert!(!f.exists(), "{} should be in trash", f.display());
    }

    // 23 per-item EXECUTED records plus one batch-level record.
    let today = Utc::now().date_naive();
    let records = t.engine.audit().records_for(today).unwrap();
    let executed_items = records
        .iter()
        .filter(|r| r.action == AuditAction::Executed && r.item_index.is_some())
        .count();
    let executed_batch = records
        .iter()
        .filter(|r| r.action == AuditAction::Executed && r.item_index.is_none())
        .count();
    assert_eq!(executed_items, 23);
    assert_eq!(executed_batch, 1);

    // Undo restores every file to its original location.
    let rb = t.engine.rollback(op_id).unwrap();
    assert_eq!(rb.succeeded, 23);
    for f in &files {
        assert!(f.exists(), "{} should be restored", f.display());
    }
    assert_eq!(
        fs::read_to_string(&files[7]).unwrap(),
        "contents of scratch7"
    );
}

#[test]
fn test_rollback_is_single_shot() {
    let t = test_engine();
    let src = t.work.join("a.txt");
    fs::write(&src, "a").unwrap();

    let req = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&src, t.work.join("b.txt"))],
    );
    let op_id = req.id;
    t.engine.execute(req).unwrap();

    assert!(t.engine.rollback(op_id).unwrap().all_succeeded());
    assert!(src.exists());

    let err = t.engine.rollback(op_id).unwrap_err();
    assert!(matches!(err, EngineError::OperationNotFound(_)));
    // The file was not bounced around a second time.
    assert!(src.exists());
    assert!(!t.work.join("b.txt").exists());
}

#[test]
fn test_rollback_unknown_operation() {
    let t = test_engine();
    let err = t.engine.rollback(Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, EngineError::OperationNotFound(_)));
}

#[test]
fn test_rollback_latest_targets_newest_operation() {
    let t = test_engine();
    let first = t.work.join("first.txt");
    let second = t.work.join("second.txt");
    fs::write(&first, "1").unwrap();
    fs::write(&second, "2").unwrap();

    let req1 = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&first, t.work.join("first_moved.txt"))],
    );
    t.engine.execute(req1).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    let req2 = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&second, t.work.join("second_moved.txt"))],
    );
    let op2 = req2.id;
    t.engine.execute(req2).unwrap();

    let rb = t.engine.rollback_latest().unwrap();
    assert_eq!(rb.operation_id, op2);
    assert!(second.exists());
    assert!(!first.exists()); // first operation still applied
}

#[test]
fn test_rollback_removes_directories_created_by_the_move() {
    let t = test_engine();
    let src = t.work.join("a.txt");
    fs::write(&src, "x").unwrap();
    let dest = t.work.join("sorted/2026/aug/a.txt");

    let req = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&src, &dest)],
    );
    let op_id = req.id;
    assert!(t.engine.execute(req).unwrap().summary().unwrap().all_succeeded());
    assert!(dest.exists());

    // Undo puts the file back and drops the directory chain the move
    // created for it.
    let rb = t.engine.rollback(op_id).unwrap();
    assert!(rb.all_succeeded());
    assert!(src.exists());
    assert!(!t.work.join("sorted").exists());
}

#[test]
fn test_undo_survives_engine_restart() {
    let t = test_engine();
    let src = t.work.join("persist.txt");
    fs::write(&src, "durable").unwrap();

    let req = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&src, t.work.join("persist_moved.txt"))],
    );
    let op_id = req.id;
    t.engine.execute(req).unwrap();
    drop(t.engine);

    // Reopen over the same data directory.
    let engine = fsbatch::Engine::open(fsbatch::EngineConfig::new(t.temp.path().join("data"))).unwrap();
    assert_eq!(engine.pending_undo_count(), 1);

    let rb = engine.rollback(op_id).unwrap();
    assert!(rb.all_succeeded());
    assert_eq!(fs::read_to_string(&src).unwrap(), "durable");
}

#[test]
fn test_rollback_audited_per_item() {
    let t = test_engine();
    let files = make_files(&t.work, "audit", "txt", 4);
    let dest = t.work.join("out");

    let items = files
        .iter()
        .map(|f| BatchItem::with_dest(f, dest.join(f.file_name().unwrap())))
        .collect();
    let req = BatchRequest::new(OpKind::Move, "session", items);
    let op_id = req.id;
    t.engine.execute(req).unwrap();
    t.engine.rollback(op_id).unwrap();

    let records = t.engine.audit().records_for_operation(op_id).unwrap();
    let rolled_back_items = records
        .iter()
        .filter(|r| r.action == AuditAction::RolledBack && r.item_index.is_some())
        .count();
    assert_eq!(rolled_back_items, 4);
}

#[test]
fn test_sweep_reports_nothing_fresh() {
    let t = test_engine();
    let src = t.work.join("fresh.txt");
    fs::write(&src, "x").unwrap();

    let req = BatchRequest::new(
        OpKind::Move,
        "session",
        vec![BatchItem::with_dest(&src, t.work.join("fresh_moved.txt"))],
    );
    t.engine.execute(req).unwrap();

    // Nothing is 24 hours old yet.
    assert_eq!(t.engine.sweep().unwrap(), 0);
    assert_eq!(t.engine.pending_undo_count(), 1);
}
