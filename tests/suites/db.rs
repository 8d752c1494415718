//! File database, migrations, named queries and criteria together.

use std::sync::Arc;

use koala::db::{self, DbConfig};
use koala::migration::{FileSource, Migration};
use koala::{Criteria, Pool, Router, Template, response};
use serde::{Deserialize, Serialize};

use super::{body, get, test_config};

const BOARDS: &str = "-- +migrate Up
CREATE TABLE boards (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    owner TEXT NOT NULL
);

-- +migrate Down
DROP TABLE boards;
";

const CARDS: &str = "-- +migrate Up
CREATE TABLE cards (
    id INTEGER PRIMARY KEY,
    board_id INTEGER NOT NULL REFERENCES boards (id),
    title TEXT NOT NULL
);

-- +migrate Down
DROP TABLE cards;
";

const INSERT_BOARD: &str = "INSERT INTO boards (id, name, owner) VALUES (:id, :name, :owner)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Board {
    id: i64,
    name: String,
    owner: String,
}

fn board(id: i64, name: &str, owner: &str) -> Board {
    Board {
        id,
        name: name.to_string(),
        owner: owner.to_string(),
    }
}

/// A migrated database file in a temporary directory.
async fn database() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(migrations.join("0001_boards.sql"), BOARDS).unwrap();
    std::fs::write(migrations.join("0002_cards.sql"), CARDS).unwrap();

    let pool = db::connect(&DbConfig {
        driver: "sqlite3".into(),
        dsn: dir.path().join("koala.db").to_string_lossy().into_owned(),
        max_open_conns: 4,
        max_idle_conns: 2,
    })
    .await
    .unwrap();

    let applied = Migration::new(pool.clone(), FileSource::new(&migrations))
        .up()
        .await
        .unwrap();
    assert_eq!(applied, 2);
    (dir, pool)
}

async fn seed(tpl: &Template) {
    let boards = vec![
        board(1, "Koala roadmap", "ana"),
        board(2, "Groceries", "ana"),
        board(3, "Koala bugs", "bruno"),
    ];
    tpl.tx_do(move |tx| {
        Box::pin(async move {
            for b in &boards {
                Template::tx_named_exec(tx, INSERT_BOARD, b).await?;
            }
            Ok(())
        })
    })
    .await
    .unwrap();
}

async fn search(tpl: &Template, criteria: &Criteria) -> Vec<Board> {
    let sql = criteria.merge_sql("SELECT id, name, owner FROM boards");
    tpl.named_query(&format!("{sql} ORDER BY id"), criteria.named_bind_vars())
        .await
        .unwrap()
}

#[tokio::test]
async fn rejects_unknown_driver() {
    let config = DbConfig {
        driver: "postgres".into(),
        ..DbConfig::default()
    };
    assert!(matches!(
        db::connect(&config).await,
        Err(koala::Error::Config(_))
    ));
}

#[tokio::test]
async fn pool_is_bounded_by_config() {
    let (_dir, pool) = database().await;
    assert_eq!(pool.max_open(), 4);
    assert_eq!(pool.max_idle(), 2);

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();
    drop((a, b, c));
    assert_eq!(pool.idle_count(), 2);
}

#[tokio::test]
async fn criteria_filter_named_queries() {
    let (_dir, pool) = database().await;
    let tpl = Template::new(pool);
    seed(&tpl).await;

    let all = search(&tpl, &Criteria::new()).await;
    assert_eq!(all.len(), 3);

    let mut criteria = Criteria::new();
    criteria.add(criteria.both_like("name", "koala"));
    let found = search(&tpl, &criteria).await;
    assert_eq!(
        found.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![1, 3]
    );

    criteria.add(criteria.eq("owner", "bruno"));
    assert_eq!(search(&tpl, &criteria).await, vec![board(3, "Koala bugs", "bruno")]);
}

#[tokio::test]
async fn failed_transaction_leaves_no_rows() {
    let (_dir, pool) = database().await;
    let tpl = Template::new(pool);

    let duplicate = vec![board(1, "First", "ana"), board(1, "Again", "ana")];
    let err = tpl
        .tx_do(move |tx| {
            Box::pin(async move {
                for b in &duplicate {
                    Template::tx_named_exec(tx, INSERT_BOARD, b).await?;
                }
                Ok(())
            })
        })
        .await
        .unwrap_err();
    assert!(err.is_database());

    let err = tpl
        .named_get::<Board, _>(
            "SELECT id, name, owner FROM boards WHERE id = :id",
            &serde_json::json!({ "id": 1 }),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn down_reverts_schema() {
    let (dir, pool) = database().await;
    let migration = Migration::new(pool.clone(), FileSource::new(dir.path().join("migrations")));

    assert_eq!(migration.down().await.unwrap(), 2);
    let tpl = Template::new(pool);
    let err = tpl
        .named_exec(INSERT_BOARD, &board(1, "Gone", "ana"))
        .await
        .unwrap_err();
    assert!(err.is_database());
}

#[tokio::test]
async fn handlers_reach_the_pool() {
    let (_dir, pool) = database().await;
    seed(&Template::new(pool.clone())).await;

    let mut router = Router::new();
    let routes = vec![router.get("show", "/:id", |ctx| async move {
        let tpl = Template::new(ctx.require_db()?.clone());
        let id: i64 = ctx
            .param_as("id")
            .ok_or_else(|| koala::Error::illegal_argument("id must be a number"))?;
        let found: Board = tpl
            .named_get(
                "SELECT id, name, owner FROM boards WHERE id = :id",
                &serde_json::json!({ "id": id }),
            )
            .await?;
        response::ok(&found)
    })];
    router.add_routes("boards", routes).unwrap();

    let server = koala::server::start(
        Arc::new(test_config()),
        Some(pool),
        router.start().unwrap(),
    )
    .await
    .unwrap();
    let found = get(server.addr(), "/boards/2", &[]).await;
    let missing = get(server.addr(), "/boards/9", &[]).await;
    server.shutdown().await.unwrap();

    assert_eq!(body(&found), r#"{"id":2,"name":"Groceries","owner":"ana"}"#);
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");
    assert_eq!(body(&missing), r#"{"errors":["Record not found."]}"#);
}
