#[cfg(test)]
mod tests {
    use crate::database::{
        CURRENT_SCHEMA, DeclarativeMigrator, migrate_database_declaratively, normalize_sql,
    };
    use rocket::tokio;
    use sqlx::{Row, SqlitePool};

    const EMPTY_SCHEMA: &str = "";

    const LEADERS_SCHEMA: &str = r#"
        CREATE TABLE leaders (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );
    "#;

    const LEADERS_AND_PUPILS_SCHEMA: &str = r#"
        CREATE TABLE leaders (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE pupils (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            leader_id INTEGER,
            FOREIGN KEY (leader_id) REFERENCES leaders (id)
        );
    "#;

    const LEADERS_WITH_GENDER_SCHEMA: &str = r#"
        CREATE TABLE leaders (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            gender TEXT
        );

        CREATE TABLE pupils (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            leader_id INTEGER,
            FOREIGN KEY (leader_id) REFERENCES leaders (id)
        );
    "#;

    const LEADERS_WITHOUT_NAME_SCHEMA: &str = r#"
    CREATE TABLE leaders (
        id INTEGER PRIMARY KEY
    );
    "#;

    const WITH_INDEX_SCHEMA: &str = r#"
    CREATE TABLE leaders (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE INDEX idx_leader_name ON leaders(name);
    "#;

    async fn create_test_db() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database")
    }

    async fn get_table_names(pool: &SqlitePool) -> Vec<String> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name != 'sqlite_sequence' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("Failed to fetch table names");

        rows.into_iter().map(|row| row.get::<String, _>(0)).collect()
    }

    async fn get_column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query(&format!("PRAGMA table_info({})", table))
            .fetch_all(pool)
            .await
            .expect("Failed to fetch columns")
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect()
    }

    async fn index_exists(pool: &SqlitePool, name: &str) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?")
                .bind(name)
                .fetch_one(pool)
                .await
                .expect("Failed to query indices");
        count == 1
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled_by_default() {
        let pool = create_test_db().await;

        let pragma: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("Failed to get pragma");

        assert_eq!(pragma, 1);
    }

    #[tokio::test]
    async fn test_empty_to_empty_no_changes() {
        let pool = create_test_db().await;

        let changed = migrate_database_declaratively(pool.clone(), EMPTY_SCHEMA, false)
            .await
            .expect("Migration should succeed");
        assert!(!changed, "Empty to empty should report no changes");
        assert!(get_table_names(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_rerun() {
        let pool = create_test_db().await;

        let changed = migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, false)
            .await
            .unwrap();
        assert!(changed, "Creating first table should report changes");
        assert_eq!(get_table_names(&pool).await, vec!["leaders"]);

        let changed = migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, false)
            .await
            .unwrap();
        assert!(!changed, "Re-running same migration should be no-op");
    }

    #[tokio::test]
    async fn test_current_schema_is_idempotent() {
        let pool = create_test_db().await;

        assert!(
            migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, false)
                .await
                .unwrap()
        );
        assert_eq!(
            get_table_names(&pool).await,
            vec![
                "principals",
                "sessions",
                "staff",
                "students",
                "team_leaders",
                "team_rosters"
            ]
        );

        let plan = DeclarativeMigrator::new(pool.clone(), CURRENT_SCHEMA, false)
            .plan()
            .await
            .unwrap();
        assert!(plan.is_empty(), "Unexpected pending changes: {:?}", plan);

        assert!(
            !migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, false)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_add_table_and_column_preserves_rows() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEADERS_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO leaders (name) VALUES (?)")
            .bind("Alice")
            .execute(&pool)
            .await
            .unwrap();

        let plan = DeclarativeMigrator::new(pool.clone(), LEADERS_WITH_GENDER_SCHEMA, false)
            .plan()
            .await
            .unwrap();
        assert_eq!(plan.new_tables, vec!["pupils"]);
        assert_eq!(plan.modified_tables.len(), 1);
        assert!(plan.destructive_changes().is_empty());

        let changed =
            migrate_database_declaratively(pool.clone(), LEADERS_WITH_GENDER_SCHEMA, false)
                .await
                .unwrap();
        assert!(changed);

        assert_eq!(get_table_names(&pool).await, vec!["leaders", "pupils"]);
        assert!(get_column_names(&pool, "leaders").await.contains(&"gender".to_string()));

        let row = sqlx::query("SELECT name, gender FROM leaders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("name"), "Alice");
        assert!(row.get::<Option<String>, _>("gender").is_none());
    }

    #[tokio::test]
    async fn test_table_removal_requires_permission() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEADERS_AND_PUPILS_SCHEMA)
            .execute(&pool)
            .await
            .unwrap();

        let err = migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, false)
            .await
            .expect_err("Should fail without allow_deletions");
        let message = err.to_string();
        assert!(message.contains("drop table pupils"), "got: {}", message);
        assert!(message.contains("allow_deletions=false"), "got: {}", message);
        assert_eq!(get_table_names(&pool).await, vec!["leaders", "pupils"]);

        let changed = migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, true)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(get_table_names(&pool).await, vec!["leaders"]);
    }

    #[tokio::test]
    async fn test_column_removal_requires_permission() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEADERS_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO leaders (name) VALUES ('Alice')")
            .execute(&pool)
            .await
            .unwrap();

        let err = migrate_database_declaratively(pool.clone(), LEADERS_WITHOUT_NAME_SCHEMA, false)
            .await
            .expect_err("Should refuse to drop a column");
        assert!(err.to_string().contains("drop column leaders.name"));
        assert!(get_column_names(&pool, "leaders").await.contains(&"name".to_string()));

        migrate_database_declaratively(pool.clone(), LEADERS_WITHOUT_NAME_SCHEMA, true)
            .await
            .unwrap();
        assert_eq!(get_column_names(&pool, "leaders").await, vec!["id"]);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leaders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "Rows survive a column drop");
    }

    #[tokio::test]
    async fn test_index_removal_requires_permission() {
        let pool = create_test_db().await;
        sqlx::raw_sql(WITH_INDEX_SCHEMA).execute(&pool).await.unwrap();

        let err = migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, false)
            .await
            .expect_err("Should refuse to drop an index");
        assert!(err.to_string().contains("drop index idx_leader_name"));
        assert!(index_exists(&pool, "idx_leader_name").await);

        migrate_database_declaratively(pool.clone(), LEADERS_SCHEMA, true)
            .await
            .unwrap();
        assert!(!index_exists(&pool, "idx_leader_name").await);
    }

    #[tokio::test]
    async fn test_add_index() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEADERS_SCHEMA).execute(&pool).await.unwrap();

        let changed = migrate_database_declaratively(pool.clone(), WITH_INDEX_SCHEMA, false)
            .await
            .unwrap();
        assert!(changed);
        assert!(index_exists(&pool, "idx_leader_name").await);
    }

    #[test]
    fn test_normalize_sql() {
        assert_eq!(
            normalize_sql("CREATE TABLE test( -- comment\n  id INTEGER )"),
            "CREATE TABLE test(id INTEGER)"
        );

        assert_eq!(
            normalize_sql("CREATE TABLE \"quoted\"(id INTEGER)"),
            "CREATE TABLE quoted(id INTEGER)"
        );
    }
}
