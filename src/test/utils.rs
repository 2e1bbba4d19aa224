use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Once;

use crate::api::LoginResponse;
use crate::config::AppConfig;
use crate::database::{CURRENT_SCHEMA, migrate_database_declaratively};
use crate::db::{
    add_to_roster, create_principal, create_staff, insert_team_leader, list_roster_entries,
    list_students,
};
use crate::error::AppError;
use crate::init_rocket;
use crate::models::{Gender, NewTeamLeader};
use crate::roster::{RosterManager, RosterPolicy, find_roster_issues};

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";

pub struct TestTeamLeader {
    pub name: String,
    pub age_undertaken: i64,
    pub gender: Gender,
}

/// A seeded student. `team_leader` is the pointer, `rosters` the teams whose
/// roster lists the student. Consistent seeds use the same single team for both.
pub struct TestStudent {
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub team_leader: Option<String>,
    pub rosters: Vec<String>,
}

#[derive(Default)]
pub struct TestDbBuilder {
    staff: Vec<(String, String)>,
    principals: Vec<String>,
    team_leaders: Vec<TestTeamLeader>,
    students: Vec<TestStudent>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staff(mut self, username: &str, name: &str) -> Self {
        self.staff.push((username.to_string(), name.to_string()));
        self
    }

    pub fn principal(mut self, username: &str) -> Self {
        self.principals.push(username.to_string());
        self
    }

    pub fn team_leader(mut self, name: &str, age_undertaken: i64, gender: Gender) -> Self {
        self.team_leaders.push(TestTeamLeader {
            name: name.to_string(),
            age_undertaken,
            gender,
        });
        self
    }

    pub fn student(mut self, name: &str, age: i64, gender: Gender, team_leader: &str) -> Self {
        self.students.push(TestStudent {
            name: name.to_string(),
            age,
            gender,
            team_leader: Some(team_leader.to_string()),
            rosters: vec![team_leader.to_string()],
        });
        self
    }

    /// Seeds a student whose pointer and roster memberships are given
    /// independently, bypassing the roster manager.
    pub fn inconsistent_student(
        mut self,
        name: &str,
        age: i64,
        gender: Gender,
        team_leader: Option<&str>,
        rosters: &[&str],
    ) -> Self {
        self.students.push(TestStudent {
            name: name.to_string(),
            age,
            gender,
            team_leader: team_leader.map(String::from),
            rosters: rosters.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("debug"),
            )
            .is_test(true)
            .try_init();
        });

        let pool = SqlitePool::connect("sqlite::memory:").await?;
        migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, false).await?;

        let mut staff_ids = HashMap::new();
        for (username, name) in &self.staff {
            let id = create_staff(&pool, name, username, STANDARD_PASSWORD).await?;
            staff_ids.insert(username.clone(), id);
        }

        let mut principal_ids = HashMap::new();
        for username in &self.principals {
            let id = create_principal(&pool, username, STANDARD_PASSWORD).await?;
            principal_ids.insert(username.clone(), id);
        }

        let mut team_leader_ids = HashMap::new();
        for leader in &self.team_leaders {
            let id = insert_team_leader(
                &pool,
                &NewTeamLeader {
                    name: leader.name.clone(),
                    gender: leader.gender,
                    age_undertaken: leader.age_undertaken,
                },
            )
            .await?;
            team_leader_ids.insert(leader.name.clone(), id);
        }

        let registered_by = staff_ids.values().min().copied();
        let mut student_ids = HashMap::new();
        for student in &self.students {
            let pointer = student
                .team_leader
                .as_ref()
                .map(|name| team_leader_ids[name]);

            let id = sqlx::query(
                "INSERT INTO students (name, age, gender, phone, address, team_leader_id, registered_by)
                 VALUES (?, ?, ?, '555-0100', '1 Test Street', ?, ?)",
            )
            .bind(&student.name)
            .bind(student.age)
            .bind(student.gender.as_str())
            .bind(pointer)
            .bind(registered_by)
            .execute(&pool)
            .await?
            .last_insert_rowid();

            for roster in &student.rosters {
                add_to_roster(&pool, team_leader_ids[roster], id).await?;
            }
            student_ids.insert(student.name.clone(), id);
        }

        Ok(TestDb {
            pool,
            staff_ids,
            principal_ids,
            team_leader_ids,
            student_ids,
        })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub staff_ids: HashMap<String, i64>,
    pub principal_ids: HashMap<String, i64>,
    pub team_leader_ids: HashMap<String, i64>,
    pub student_ids: HashMap<String, i64>,
}

/// Rows of every table the roster operations touch, for before/after
/// comparisons.
#[derive(Debug, PartialEq)]
pub struct StoreSnapshot {
    pub students: Vec<(i64, String, i64, String, Option<i64>)>,
    pub team_leaders: Vec<(i64, String, String, i64)>,
    pub rosters: Vec<(i64, i64)>,
}

impl TestDb {
    pub fn staff_id(&self, username: &str) -> i64 {
        self.staff_ids[username]
    }

    pub fn principal_id(&self, username: &str) -> i64 {
        self.principal_ids[username]
    }

    pub fn team_leader_id(&self, name: &str) -> i64 {
        self.team_leader_ids[name]
    }

    pub fn student_id(&self, name: &str) -> i64 {
        self.student_ids[name]
    }

    pub fn manager(&self) -> RosterManager {
        RosterManager::new(self.pool.clone(), RosterPolicy::default())
    }

    pub fn strict_manager(&self) -> RosterManager {
        RosterManager::new(
            self.pool.clone(),
            RosterPolicy {
                strict: true,
                ..RosterPolicy::default()
            },
        )
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let students: Vec<(i64, String, i64, String, Option<i64>)> = sqlx::query_as(
            "SELECT id, name, age, gender, team_leader_id FROM students ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read students");
        let team_leaders: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, name, gender, age_undertaken FROM team_leaders ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read team leaders");
        let rosters = list_roster_entries(&self.pool)
            .await
            .expect("Failed to read rosters");

        StoreSnapshot {
            students,
            team_leaders,
            rosters,
        }
    }

    /// Panics unless every pointer matches exactly one roster entry and
    /// every roster entry matches a pointer.
    pub async fn assert_rosters_consistent(&self) {
        let students = list_students(&self.pool)
            .await
            .expect("Failed to list students");
        let entries = list_roster_entries(&self.pool)
            .await
            .expect("Failed to list roster entries");

        let issues = find_roster_issues(&students, &entries);
        assert!(issues.is_empty(), "Roster invariant violated: {:?}", issues);
    }
}

pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .staff("staff_user", "Staff User")
        .principal("principal_user")
        .team_leader("Alice", 10, Gender::Female)
        .team_leader("Bella", 10, Gender::Female)
        .team_leader("Carl", 11, Gender::Male)
        .student("Dana", 10, Gender::Female, "Bella")
        .student("Evan", 11, Gender::Male, "Carl")
        .build()
        .await
        .expect("Failed to build standard test database")
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    let roster = test_db.manager();
    let rocket = init_rocket(test_db.pool.clone(), roster, AppConfig::default());
    let client = Client::tracked(rocket)
        .await
        .expect("Failed to create test client");
    (client, test_db)
}

/// Logs in on a tracked client; the session cookie is kept by the client.
pub async fn login(client: &Client, username: &str, role: &str) -> LoginResponse {
    let response = client
        .post("/api/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "username": username,
                "password": STANDARD_PASSWORD,
                "role": role,
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let login: LoginResponse = response
        .into_json()
        .await
        .expect("Login response was not JSON");
    assert!(login.success, "Login failed for {}", username);
    login
}
