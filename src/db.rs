use crate::{
    auth::{DbSession, Role, Session},
    error::AppError,
    models::{
        DbPrincipal, DbStaff, DbStudent, DbTeamLeader, Gender, NewStudent, NewTeamLeader,
        Principal, Staff, StaffId, Student, StudentId, TeamLeader, TeamLeaderId,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Executor, Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

const TEAM_LEADER_COLUMNS: &str = "SELECT t.id, t.name, t.gender, t.age_undertaken,
        (SELECT GROUP_CONCAT(r.student_id) FROM team_rosters r WHERE r.team_leader_id = t.id) AS roster
     FROM team_leaders t";

const STUDENT_COLUMNS: &str = "SELECT id, name, age, gender, phone, address, team_leader_id,
        registered_by, registered_date
     FROM students";

/// Equality conditions on team leader fields. Unset fields match everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeamLeaderFilter {
    pub age_undertaken: Option<i64>,
    pub gender: Option<Gender>,
}

impl TeamLeaderFilter {
    pub fn eligible_for(age: i64, gender: Gender) -> Self {
        Self {
            age_undertaken: Some(age),
            gender: Some(gender),
        }
    }
}

// Students

#[instrument(skip(executor))]
pub async fn find_student(
    executor: impl Executor<'_, Database = Sqlite>,
    id: StudentId,
) -> Result<Student, AppError> {
    info!("Fetching student by ID");
    let row = sqlx::query_as::<_, DbStudent>(&format!("{} WHERE id = ?", STUDENT_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(student) => Student::try_from(student),
        _ => Err(AppError::NotFound(format!(
            "Student with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(executor))]
pub async fn list_students(
    executor: impl Executor<'_, Database = Sqlite>,
) -> Result<Vec<Student>, AppError> {
    info!("Listing students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!("{} ORDER BY id", STUDENT_COLUMNS))
        .fetch_all(executor)
        .await?;

    rows.into_iter().map(Student::try_from).collect()
}

#[instrument(skip(executor))]
pub async fn recent_students(
    executor: impl Executor<'_, Database = Sqlite>,
    limit: i64,
) -> Result<Vec<Student>, AppError> {
    info!("Getting recently registered students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "{} ORDER BY registered_date DESC, id DESC LIMIT ?",
        STUDENT_COLUMNS
    ))
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Student::try_from).collect()
}

#[instrument(skip(executor, student), fields(age = student.age, gender = %student.gender))]
pub async fn insert_student(
    executor: impl Executor<'_, Database = Sqlite>,
    student: &NewStudent,
    team_leader_id: TeamLeaderId,
    registered_by: StaffId,
    registered_date: NaiveDateTime,
) -> Result<StudentId, AppError> {
    info!("Creating student");
    let res = sqlx::query(
        "INSERT INTO students
         (name, age, gender, phone, address, team_leader_id, registered_by, registered_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&student.name)
    .bind(student.age)
    .bind(student.gender.as_str())
    .bind(&student.phone)
    .bind(&student.address)
    .bind(team_leader_id)
    .bind(registered_by)
    .bind(registered_date)
    .execute(executor)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Points a student at a team leader. Only the pointer is touched; rosters
/// are maintained by the caller.
#[instrument(skip(executor))]
pub async fn update_student_team_leader(
    executor: impl Executor<'_, Database = Sqlite>,
    student_id: StudentId,
    team_leader_id: TeamLeaderId,
) -> Result<(), AppError> {
    info!("Updating student team leader");
    let res = sqlx::query("UPDATE students SET team_leader_id = ? WHERE id = ?")
        .bind(team_leader_id)
        .bind(student_id)
        .execute(executor)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student with id {} not found in database",
            student_id
        )));
    }

    Ok(())
}

#[instrument(skip(executor))]
pub async fn count_students(
    executor: impl Executor<'_, Database = Sqlite>,
) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

// Team leaders

#[instrument(skip(executor))]
pub async fn find_team_leader(
    executor: impl Executor<'_, Database = Sqlite>,
    id: TeamLeaderId,
) -> Result<TeamLeader, AppError> {
    info!("Fetching team leader by ID");
    let row = sqlx::query_as::<_, DbTeamLeader>(&format!("{} WHERE t.id = ?", TEAM_LEADER_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(leader) => TeamLeader::try_from(leader),
        _ => Err(AppError::NotFound(format!(
            "Team leader with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(executor))]
pub async fn find_team_leaders_where(
    executor: impl Executor<'_, Database = Sqlite>,
    filter: TeamLeaderFilter,
) -> Result<Vec<TeamLeader>, AppError> {
    info!("Finding team leaders");
    let mut builder = QueryBuilder::<Sqlite>::new(TEAM_LEADER_COLUMNS);
    builder.push(" WHERE 1 = 1");
    if let Some(age) = filter.age_undertaken {
        builder.push(" AND t.age_undertaken = ").push_bind(age);
    }
    if let Some(gender) = filter.gender {
        builder.push(" AND t.gender = ").push_bind(gender.as_str());
    }
    builder.push(" ORDER BY t.id");

    let rows = builder
        .build_query_as::<DbTeamLeader>()
        .fetch_all(executor)
        .await?;

    rows.into_iter().map(TeamLeader::try_from).collect()
}

pub async fn list_team_leaders(
    executor: impl Executor<'_, Database = Sqlite>,
) -> Result<Vec<TeamLeader>, AppError> {
    find_team_leaders_where(executor, TeamLeaderFilter::default()).await
}

#[instrument(skip(executor, leader), fields(name = %leader.name))]
pub async fn insert_team_leader(
    executor: impl Executor<'_, Database = Sqlite>,
    leader: &NewTeamLeader,
) -> Result<TeamLeaderId, AppError> {
    info!("Creating team leader");
    let res = sqlx::query(
        "INSERT INTO team_leaders (name, gender, age_undertaken) VALUES (?, ?, ?)",
    )
    .bind(&leader.name)
    .bind(leader.gender.as_str())
    .bind(leader.age_undertaken)
    .execute(executor)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(executor))]
pub async fn count_team_leaders(
    executor: impl Executor<'_, Database = Sqlite>,
) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM team_leaders")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

// Roster membership. Both mutations are idempotent and report whether the
// set actually changed.

#[instrument(skip(executor))]
pub async fn add_to_roster(
    executor: impl Executor<'_, Database = Sqlite>,
    team_leader_id: TeamLeaderId,
    student_id: StudentId,
) -> Result<bool, AppError> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO team_rosters (team_leader_id, student_id) VALUES (?, ?)",
    )
    .bind(team_leader_id)
    .bind(student_id)
    .execute(executor)
    .await?;

    Ok(res.rows_affected() > 0)
}

#[instrument(skip(executor))]
pub async fn remove_from_roster(
    executor: impl Executor<'_, Database = Sqlite>,
    team_leader_id: TeamLeaderId,
    student_id: StudentId,
) -> Result<bool, AppError> {
    let res = sqlx::query("DELETE FROM team_rosters WHERE team_leader_id = ? AND student_id = ?")
        .bind(team_leader_id)
        .bind(student_id)
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}

/// Drops every membership of `student_id` except the one in `keep`.
/// Returns how many stale entries were removed.
#[instrument(skip(executor))]
pub async fn remove_from_other_rosters(
    executor: impl Executor<'_, Database = Sqlite>,
    student_id: StudentId,
    keep: TeamLeaderId,
) -> Result<u64, AppError> {
    let res = sqlx::query("DELETE FROM team_rosters WHERE student_id = ? AND team_leader_id != ?")
        .bind(student_id)
        .bind(keep)
        .execute(executor)
        .await?;

    Ok(res.rows_affected())
}

/// Team leaders whose roster lists `student_id`, ascending.
#[instrument(skip(executor))]
pub async fn rosters_containing(
    executor: impl Executor<'_, Database = Sqlite>,
    student_id: StudentId,
) -> Result<Vec<TeamLeaderId>, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT team_leader_id FROM team_rosters WHERE student_id = ? ORDER BY team_leader_id",
    )
    .bind(student_id)
    .fetch_all(executor)
    .await?;
    Ok(ids)
}

/// All `(team_leader_id, student_id)` membership rows.
#[instrument(skip(executor))]
pub async fn list_roster_entries(
    executor: impl Executor<'_, Database = Sqlite>,
) -> Result<Vec<(TeamLeaderId, StudentId)>, AppError> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT team_leader_id, student_id FROM team_rosters ORDER BY team_leader_id, student_id",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

// Staff

#[instrument(skip(executor))]
pub async fn find_staff(
    executor: impl Executor<'_, Database = Sqlite>,
    id: StaffId,
) -> Result<Staff, AppError> {
    let row = sqlx::query_as::<_, DbStaff>("SELECT id, name, username FROM staff WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(staff) => Ok(Staff::from(staff)),
        _ => Err(AppError::NotFound(format!(
            "Staff with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool, password))]
pub async fn create_staff(
    pool: &Pool<Sqlite>,
    name: &str,
    username: &str,
    password: &str,
) -> Result<StaffId, AppError> {
    info!("Creating staff account");

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM staff WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;

    let res = sqlx::query("INSERT INTO staff (name, username, password) VALUES (?, ?, ?)")
        .bind(name)
        .bind(username)
        .bind(hashed_password)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(executor))]
pub async fn count_staff(executor: impl Executor<'_, Database = Sqlite>) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staff")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

// Principals

#[instrument(skip(executor))]
pub async fn find_principal(
    executor: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<Principal, AppError> {
    let row = sqlx::query_as::<_, DbPrincipal>("SELECT id, username FROM principals WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(principal) => Ok(Principal::from(principal)),
        _ => Err(AppError::NotFound(format!(
            "Principal with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool, password))]
pub async fn create_principal(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<i64, AppError> {
    info!("Creating principal account");
    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;

    let res = sqlx::query("INSERT INTO principals (username, password) VALUES (?, ?)")
        .bind(username)
        .bind(hashed_password)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

/// Creates the default principal when no principal exists yet.
/// Returns whether an account was created.
#[instrument(skip(pool, password))]
pub async fn ensure_default_principal(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM principals")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Ok(false);
    }

    create_principal(pool, username, password).await?;
    info!(username, "Default principal account created");
    Ok(true)
}

/// Verifies credentials for the given role and returns the account id.
#[instrument(skip(pool, password))]
pub async fn authenticate(
    pool: &Pool<Sqlite>,
    role: Role,
    username: &str,
    password: &str,
) -> Result<Option<i64>, AppError> {
    info!("Authenticating account");
    let query = match role {
        Role::Staff => "SELECT id, password FROM staff WHERE username = ?",
        Role::Principal => "SELECT id, password FROM principals WHERE username = ?",
    };

    let account = sqlx::query_as::<_, (i64, String)>(query)
        .bind(username)
        .fetch_optional(pool)
        .await?;

    match account {
        Some((id, hashed)) => match bcrypt::verify(password, &hashed) {
            Ok(true) => Ok(Some(id)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

// Sessions

#[instrument(skip(pool, token))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    role: Role,
    account_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating session");

    let res = sqlx::query(
        "INSERT INTO sessions (role, account_id, token, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(role.as_str())
    .bind(account_id)
    .bind(token)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<Session, AppError> {
    let session = sqlx::query_as::<_, DbSession>(
        "SELECT id, role, account_id, token, created_at, expires_at FROM sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Session::try_from(session),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
