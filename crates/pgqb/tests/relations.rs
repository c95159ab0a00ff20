//! Relation execution: nested create, accessors and conflict mapping.

mod common;

use std::sync::Arc;

use common::MockAdapter;
use pgqb::prelude::*;
use pgqb::{DbError, QueryOutput};
use serde_json::json;

fn schema() -> Arc<Schema> {
    Schema::builder()
        .table(
            TableDef::new("user")
                .unique("user_email_key", ["email"])
                .has_many("posts", "post", "authorId")
                .has_one("profile", "profile", "userId"),
        )
        .table(TableDef::new("post").belongs_to("author", "user", "authorId"))
        .table(TableDef::new("profile"))
        .build()
        .unwrap()
}

fn user_row() -> QueryOutput {
    QueryOutput::new(["id", "name"], vec![vec![json!(1), json!("ann")]])
}

fn post_row(id: i64, title: &str) -> QueryOutput {
    QueryOutput::new(
        ["id", "authorId", "title"],
        vec![vec![json!(id), json!(1), json!(title)]],
    )
}

#[tokio::test]
async fn plain_create_runs_without_transaction() {
    let mock = MockAdapter::new();
    mock.respond(user_row());
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let record = users
        .create(&db, Data::new().set("name", "ann"))
        .await
        .unwrap();

    assert_eq!(record.get("id"), Some(&json!(1)));
    assert_eq!(
        mock.statements(),
        [r#"INSERT INTO "user" ("name") VALUES ($1) RETURNING *"#]
    );
}

#[tokio::test]
async fn nested_children_are_inserted_after_parent() {
    let mock = MockAdapter::new();
    mock.respond(user_row());
    mock.respond(post_row(10, "hello"));
    mock.respond(post_row(11, "again"));
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let data = Data::new().set("name", "ann").with_many(
        "posts",
        vec![
            Data::new().set("title", "hello"),
            Data::new().set("title", "again"),
        ],
    );
    let record = users.create(&db, data).await.unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"INSERT INTO "user" ("name") VALUES ($1) RETURNING *"#,
            r#"INSERT INTO "post" ("title", "authorId") VALUES ($1, $2) RETURNING *"#,
            r#"INSERT INTO "post" ("title", "authorId") VALUES ($1, $2) RETURNING *"#,
            "COMMIT"
        ]
    );
    assert_eq!(mock.params()[1], ["\"hello\"", "1"]);
    assert_eq!(
        serde_json::Value::Object(record),
        json!({
            "id": 1,
            "name": "ann",
            "posts": [
                {"id": 10, "authorId": 1, "title": "hello"},
                {"id": 11, "authorId": 1, "title": "again"}
            ]
        })
    );
}

#[tokio::test]
async fn nested_parent_is_inserted_first() {
    let mock = MockAdapter::new();
    mock.respond(user_row());
    mock.respond(post_row(10, "hello"));
    let db = Db::new(mock.clone());
    let posts = schema().table("post").unwrap();

    let data = Data::new()
        .set("title", "hello")
        .with_one("author", Data::new().set("name", "ann"));
    let record = posts.create(&db, data).await.unwrap();

    assert_eq!(
        mock.statements(),
        [
            "BEGIN",
            r#"INSERT INTO "user" ("name") VALUES ($1) RETURNING *"#,
            r#"INSERT INTO "post" ("title", "authorId") VALUES ($1, $2) RETURNING *"#,
            "COMMIT"
        ]
    );
    assert_eq!(record.get("author"), Some(&json!({"id": 1, "name": "ann"})));
}

#[tokio::test]
async fn failed_child_insert_rolls_back_parent() {
    let mock = MockAdapter::new();
    mock.respond(user_row());
    mock.fail_when(r#"INSERT INTO "post""#, "insert failed");
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let data = Data::new()
        .set("name", "ann")
        .with_one("posts", Data::new().set("title", "hello"));
    let err = users.create(&db, data).await.unwrap_err();

    assert_eq!(err.to_string(), "insert failed");
    let statements = mock.statements();
    assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!statements.iter().any(|s| s == "COMMIT"));
}

#[tokio::test]
async fn nested_create_inside_transaction_adds_no_savepoint() {
    let mock = MockAdapter::new();
    mock.respond(user_row());
    mock.respond(post_row(10, "hello"));
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    db.transaction(|tx| async move {
        let data = Data::new()
            .set("name", "ann")
            .with_one("posts", Data::new().set("title", "hello"));
        users.create(&tx, data).await
    })
    .await
    .unwrap();

    let statements = mock.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.len(), 4);
    assert!(!statements.iter().any(|s| s.starts_with("SAVEPOINT")));
}

#[tokio::test]
async fn accessor_executes_with_row_key() {
    let mock = MockAdapter::new();
    mock.respond(post_row(10, "hello"));
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let posts = users
        .related("posts", &json!({"id": 1, "name": "ann"}))
        .unwrap()
        .exec(&db)
        .await
        .unwrap()
        .into_records()
        .unwrap();

    assert_eq!(posts.len(), 1);
    assert_eq!(
        mock.statements(),
        [r#"SELECT * FROM "post" WHERE "post"."authorId" = $1"#]
    );
    assert_eq!(mock.params(), [vec!["1".to_string()]]);
}

#[tokio::test]
async fn unique_violation_maps_to_conflict() {
    let mock = MockAdapter::new();
    mock.fail_with_db(
        r#"INSERT INTO "user""#,
        DbError::new("23505", "duplicate key value violates unique constraint")
            .with_constraint("user_email_key"),
    );
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let err = users
        .create(&db, Data::new().set("email", "ann@example.com"))
        .await
        .unwrap_err();

    assert!(err.is_unique_violation());
    match err {
        OrmError::Conflict { table, columns, .. } => {
            assert_eq!(table, "user");
            assert_eq!(columns, ["email"]);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn has_one_rejects_several_rows() {
    let mock = MockAdapter::new();
    let db = Db::new(mock.clone());
    let users = schema().table("user").unwrap();

    let data = Data::new().set("name", "ann").with_many(
        "profile",
        vec![Data::new().set("bio", "a"), Data::new().set("bio", "b")],
    );
    let err = users.create(&db, data).await.unwrap_err();

    assert!(err.is_build());
    assert_eq!(mock.statements(), ["BEGIN", "ROLLBACK"]);
}
