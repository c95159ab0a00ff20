//! Transaction manager behaviour against a recording adapter.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::MockAdapter;
use pgqb::prelude::*;
use pgqb::{QueryOutput, qb};

fn fired() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn nested_commit_emits_savepoint_statements() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    db.transaction(|tx| async move {
        assert_eq!(tx.depth(), 1);
        tx.transaction(|inner| async move {
            assert_eq!(inner.depth(), 2);
            inner.query("SELECT 1", &[]).await?;
            Ok::<_, OrmError>(())
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"SAVEPOINT "1""#,
            "SELECT 1",
            r#"RELEASE SAVEPOINT "1""#,
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn nested_failure_rolls_back_to_savepoint_and_reraises() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    let err = db
        .transaction(|tx| async move {
            tx.transaction(|inner| async move {
                inner.query("SELECT 1", &[]).await?;
                Err::<(), _>(OrmError::validation("boom"))
            })
            .await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Validation(ref m) if m == "boom"));
    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"SAVEPOINT "1""#,
            "SELECT 1",
            r#"ROLLBACK TO SAVEPOINT "1""#,
            "ROLLBACK"
        ]
    );
}

#[tokio::test]
async fn caught_nested_failure_keeps_outer_transaction() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    db.transaction(|tx| async move {
        let nested = tx
            .transaction(|_inner| async move { Err::<(), _>(OrmError::validation("skip")) })
            .await;
        assert!(nested.is_err());
        tx.query("SELECT 2", &[]).await?;
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"SAVEPOINT "1""#,
            r#"ROLLBACK TO SAVEPOINT "1""#,
            "SELECT 2",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn savepoint_counter_only_grows() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    db.transaction(|tx| async move {
        tx.transaction(|_a| async move { Ok::<_, OrmError>(()) }).await?;
        tx.transaction(|b| async move {
            b.transaction(|_c| async move { Ok::<_, OrmError>(()) }).await
        })
        .await?;
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"SAVEPOINT "1""#,
            r#"RELEASE SAVEPOINT "1""#,
            r#"SAVEPOINT "2""#,
            r#"SAVEPOINT "3""#,
            r#"RELEASE SAVEPOINT "3""#,
            r#"RELEASE SAVEPOINT "2""#,
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn after_commit_runs_in_order_once_outermost_commits() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());
    let log = fired();

    let inside = log.clone();
    db.transaction(|tx| async move {
        let a = inside.clone();
        tx.after_commit(async move {
            a.lock().unwrap().push("outer");
            Ok::<_, OrmError>(())
        })
        .await?;

        let b = inside.clone();
        tx.transaction(|inner| async move {
            inner
                .after_commit(async move {
                    b.lock().unwrap().push("released");
                    Ok::<_, OrmError>(())
                })
                .await
        })
        .await?;

        let c = inside.clone();
        let discarded = tx
            .transaction(|inner| async move {
                inner
                    .after_commit(async move {
                        c.lock().unwrap().push("discarded");
                        Ok::<_, OrmError>(())
                    })
                    .await?;
                Err::<(), _>(OrmError::validation("undo"))
            })
            .await;
        assert!(discarded.is_err());

        assert!(inside.lock().unwrap().is_empty());
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(*log.lock().unwrap(), ["outer", "released"]);
}

#[tokio::test]
async fn failing_hook_does_not_undo_commit_or_later_hooks() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());
    let log = fired();

    let inside = log.clone();
    let value = db
        .transaction(|tx| async move {
            tx.after_commit(async { Err::<(), _>(OrmError::Other("mail server down".to_string())) })
                .await?;
            let a = inside.clone();
            tx.after_commit(async move {
                a.lock().unwrap().push("second");
                Ok::<_, OrmError>(())
            })
            .await?;
            Ok::<_, OrmError>(42)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(*log.lock().unwrap(), ["second"]);
    assert_eq!(mock.statements(), ["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn rollback_discards_hooks() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());
    let log = fired();

    let inside = log.clone();
    let result = db
        .transaction(|tx| async move {
            tx.after_commit(async move {
                inside.lock().unwrap().push("never");
                Ok::<_, OrmError>(())
            })
            .await?;
            Err::<(), _>(OrmError::not_found("missing"))
        })
        .await;

    assert!(result.unwrap_err().is_not_found());
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(mock.statements(), ["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn after_commit_outside_transaction_runs_immediately() {
    let db = Db::new(MockAdapter::new());
    let log = fired();

    let a = log.clone();
    db.after_commit(async move {
        a.lock().unwrap().push("now");
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(*log.lock().unwrap(), ["now"]);
}

#[tokio::test]
async fn ensure_transaction_reuses_open_transaction() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    db.ensure_transaction(|tx| async move {
        tx.ensure_transaction(|same| async move {
            assert_eq!(same.depth(), 1);
            same.query("SELECT 1", &[]).await?;
            Ok::<_, OrmError>(())
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(mock.statements(), ["BEGIN", "SELECT 1", "COMMIT"]);
}

#[tokio::test]
async fn transaction_options_follow_begin() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    let options = TransactionOptions::new()
        .isolation_level(TransactionIsolation::RepeatableRead)
        .read_only(true);
    db.transaction_with(options, |_tx| async move { Ok::<_, OrmError>(()) })
        .await
        .unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn failed_begin_runs_no_work() {
    let mock = MockAdapter::new();
    mock.fail_when("BEGIN", "connection closed");
    let db = Db::new(mock.clone());
    let log = fired();

    let inside = log.clone();
    let err = db
        .transaction(|_tx| async move {
            inside.lock().unwrap().push("work");
            Ok::<_, OrmError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "connection closed");
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(mock.statements(), ["BEGIN"]);
}

#[tokio::test]
async fn failed_rollback_still_returns_original_error() {
    let mock = MockAdapter::new();
    mock.fail_when("ROLLBACK", "socket gone");
    let db = Db::new(mock.clone());

    let err = db
        .transaction(|_tx| async move { Err::<(), _>(OrmError::validation("original")) })
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Validation(ref m) if m == "original"));
    assert_eq!(mock.statements(), ["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn finished_handle_is_rejected() {
    let db = Db::new(MockAdapter::new());

    let leaked = db
        .transaction(|tx| async move { Ok::<_, OrmError>(tx.clone()) })
        .await
        .unwrap();

    assert!(leaked.is_finished());
    let err = leaked.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, OrmError::Transaction(_)));
    assert!(matches!(
        leaked.after_commit(async { Ok::<_, OrmError>(()) }).await,
        Err(OrmError::Transaction(_))
    ));
}

#[tokio::test]
async fn descriptors_execute_inside_the_transaction() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    db.transaction(|tx| async move {
        qb::table("account")
            .where_eq("id", 1_i64)
            .update(Data::new().set("active", false))
            .exec(&tx)
            .await?;
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"UPDATE "account" SET "active" = $1 WHERE "account"."id" = $2"#,
            "COMMIT"
        ]
    );
    assert_eq!(mock.params(), [vec!["false".to_string(), "1".to_string()]]);
}

#[tokio::test]
async fn write_after_find_reports_affected_rows() {
    let mock = MockAdapter::new();
    mock.respond(QueryOutput::affected(1));
    let db = Db::new(mock.clone());

    let changed = db
        .transaction(|tx| async move {
            qb::table("account")
                .find(1_i64)
                .update(Data::new().set("active", false))
                .exec(&tx)
                .await
        })
        .await
        .unwrap();

    assert_eq!(changed.row_count(), Some(1));
    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"UPDATE "account" SET "active" = $1 WHERE "account"."id" = $2"#,
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn write_after_find_fails_when_nothing_changed() {
    let mock = MockAdapter::new();
    mock.respond(QueryOutput::affected(0));
    let db = Db::new(mock.clone());

    let err = qb::table("account")
        .find(1_i64)
        .delete()
        .exec(&db)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(
        mock.statements(),
        [r#"DELETE FROM "account" WHERE "account"."id" = $1"#]
    );
}

#[tokio::test]
async fn cancelled_transaction_is_rolled_back() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        db.transaction(|_tx| std::future::pending::<OrmResult<()>>()),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mock.statements(), ["BEGIN", "ROLLBACK"]);
}
