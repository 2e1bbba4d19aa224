use chrono::Utc;
use rocket::State;
use rocket::http::{ContentType, Cookie, CookieJar, Header, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Actor, Permission, Role, SESSION_COOKIE, Session};
use crate::config::AppConfig;
use crate::db::{
    authenticate, count_staff, count_students, count_team_leaders, create_session, create_staff,
    find_principal, find_staff, invalidate_session, list_students, list_team_leaders,
    recent_students,
};
use crate::error::AppError;
use crate::models::{Gender, NewStudent, NewTeamLeader, StudentId, TeamLeader, TeamLeaderId};
use crate::reporting::{
    StudentRow, TeamSummaryRow, TeamView, project_students, project_teams, students_csv,
    team_views, teams_csv,
};
use crate::roster::{Reassignment, RosterIssue, RosterManager};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse,
    ValidationResponse,
};

/// A JSON integer, or a string holding one. Form posts send ages as text.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AgeInput {
    Number(i64),
    Text(String),
}

impl AgeInput {
    pub fn value(&self) -> Result<i64, AppError> {
        match self {
            AgeInput::Number(age) => Ok(*age),
            AgeInput::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| AppError::Validation(format!("Age '{}' is not a whole number", text))),
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
    role: Role,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ActorData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

impl From<Actor> for ActorData {
    fn from(actor: Actor) -> Self {
        Self {
            id: actor.id,
            username: actor.username,
            display_name: actor.display_name,
            role: actor.role.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub actor: Option<ActorData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    let account_id = authenticate(db, validated.role, &validated.username, &validated.password)
        .await
        .validate_custom()?;

    let Some(account_id) = account_id else {
        return Ok(Json(LoginResponse {
            success: false,
            actor: None,
            error: Some("Invalid username or password".to_string()),
        }));
    };

    let actor = match validated.role {
        Role::Staff => find_staff(db.inner(), account_id).await.map(Actor::from),
        Role::Principal => find_principal(db.inner(), account_id).await.map(Actor::from),
    }
    .validate_custom()?;

    let token = Session::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(config.session_hours);

    create_session(db, actor.role, actor.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_hours)),
    );

    Ok(Json(LoginResponse {
        success: true,
        actor: Some(ActorData::from(actor)),
        error: None,
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));
    Status::Ok
}

#[derive(Deserialize, Validate)]
pub struct StaffSignupRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    username: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

#[post("/staff/signup", data = "<signup>")]
pub async fn api_staff_signup(
    signup: Json<StaffSignupRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    let validated = signup.validate_custom()?;

    match create_staff(db, &validated.name, &validated.username, &validated.password).await {
        Ok(_) => Ok(Status::Created),
        Err(AppError::Validation(message)) => Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error("username", &message)),
        )),
        Err(e) => Err(e.to_validation_response()),
    }
}

#[get("/me")]
pub async fn api_me(actor: Actor) -> Json<ActorData> {
    Json(ActorData::from(actor))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[derive(Serialize, Deserialize)]
pub struct DashboardResponse {
    pub actor: ActorData,
    pub student_count: i64,
    pub team_leader_count: i64,
    pub staff_count: i64,
    pub recent_students: Vec<StudentRow>,
    pub teams: Vec<TeamSummaryRow>,
    pub can_register_students: bool,
    pub can_manage_team_leaders: bool,
}

#[get("/dashboard")]
pub async fn api_dashboard(
    actor: Actor,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DashboardResponse>, ApiError> {
    actor
        .require_permission(Permission::ViewDashboard)
        .validate_custom()?;

    let pool = db.inner();
    let student_count = count_students(pool).await.validate_custom()?;
    let team_leader_count = count_team_leaders(pool).await.validate_custom()?;
    let staff_count = count_staff(pool).await.validate_custom()?;
    let recent = recent_students(pool, 5).await.validate_custom()?;
    let leaders = list_team_leaders(pool).await.validate_custom()?;
    let students = list_students(pool).await.validate_custom()?;

    let teams = project_teams(&leaders, &students)
        .summary()
        .cloned()
        .collect();

    Ok(Json(DashboardResponse {
        can_register_students: actor.has_permission(Permission::RegisterStudents),
        can_manage_team_leaders: actor.has_permission(Permission::ManageTeamLeaders),
        actor: ActorData::from(actor),
        student_count,
        team_leader_count,
        staff_count,
        recent_students: project_students(&recent, &leaders),
        teams,
    }))
}

#[derive(Deserialize, Validate)]
pub struct RegisterStudentRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    age: AgeInput,
    gender: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    address: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RegistrationResponse {
    pub student_id: StudentId,
    pub team_leader_id: TeamLeaderId,
    pub team_leader_name: String,
    pub message: String,
}

#[post("/students", data = "<registration>")]
pub async fn api_register_student(
    registration: Json<RegisterStudentRequest>,
    actor: Actor,
    roster: &State<RosterManager>,
) -> Result<Custom<Json<RegistrationResponse>>, ApiError> {
    actor
        .require_permission(Permission::RegisterStudents)
        .validate_custom()?;
    let validated = registration.validate_custom()?;

    let student = NewStudent {
        age: validated.age.value().validate_custom()?,
        gender: validated.gender.parse::<Gender>().validate_custom()?,
        name: validated.name,
        phone: validated.phone,
        address: validated.address,
    };

    let assignment = roster
        .assign_new_student(student, actor.id)
        .await
        .validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(RegistrationResponse {
            message: format!(
                "Student registered and assigned to team leader {}",
                assignment.team_leader_name
            ),
            student_id: assignment.student.id,
            team_leader_id: assignment.team_leader_id,
            team_leader_name: assignment.team_leader_name,
        }),
    ))
}

#[get("/students")]
pub async fn api_get_students(
    actor: Actor,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<StudentRow>>, ApiError> {
    actor.require_permission(Permission::ViewTeams).validate_custom()?;

    let students = list_students(db.inner()).await.validate_custom()?;
    let leaders = list_team_leaders(db.inner()).await.validate_custom()?;

    Ok(Json(project_students(&students, &leaders)))
}

#[get("/teams")]
pub async fn api_get_teams(
    actor: Actor,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<TeamView>>, ApiError> {
    actor.require_permission(Permission::ViewTeams).validate_custom()?;

    let leaders = list_team_leaders(db.inner()).await.validate_custom()?;
    let students = list_students(db.inner()).await.validate_custom()?;

    Ok(Json(team_views(&leaders, &students)))
}

#[derive(Deserialize, Validate)]
pub struct CreateTeamLeaderRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    gender: String,
    age_undertaken: AgeInput,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TeamLeaderData {
    pub id: TeamLeaderId,
    pub name: String,
    pub gender: Gender,
    pub age_undertaken: i64,
    pub student_count: usize,
}

impl From<TeamLeader> for TeamLeaderData {
    fn from(leader: TeamLeader) -> Self {
        Self {
            id: leader.id,
            student_count: leader.roster.len(),
            name: leader.name,
            gender: leader.gender,
            age_undertaken: leader.age_undertaken,
        }
    }
}

#[post("/teams", data = "<request>")]
pub async fn api_create_team_leader(
    request: Json<CreateTeamLeaderRequest>,
    actor: Actor,
    roster: &State<RosterManager>,
) -> Result<Custom<Json<TeamLeaderData>>, ApiError> {
    actor
        .require_permission(Permission::ManageTeamLeaders)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let leader = NewTeamLeader {
        gender: validated.gender.parse::<Gender>().validate_custom()?,
        age_undertaken: validated.age_undertaken.value().validate_custom()?,
        name: validated.name,
    };

    let created = roster.create_team_leader(leader).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(TeamLeaderData::from(created))))
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    team_leader_id: TeamLeaderId,
}

#[post("/students/<id>/reassign", data = "<request>")]
pub async fn api_reassign_student(
    id: StudentId,
    request: Json<ReassignRequest>,
    actor: Actor,
    roster: &State<RosterManager>,
) -> Result<Json<Reassignment>, ApiError> {
    actor
        .require_permission(Permission::ReassignStudents)
        .validate_custom()?;

    let outcome = roster
        .reassign_student(id, request.team_leader_id)
        .await
        .validate_custom()?;

    Ok(Json(outcome))
}

#[derive(rocket::Responder)]
pub struct CsvExport {
    body: String,
    content_type: ContentType,
    disposition: Header<'static>,
}

impl CsvExport {
    fn attachment(filename: &str, body: String) -> Self {
        Self {
            body,
            content_type: ContentType::CSV,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename={}", filename),
            ),
        }
    }
}

#[get("/export/students")]
pub async fn api_export_students(
    actor: Actor,
    db: &State<Pool<Sqlite>>,
) -> Result<CsvExport, ApiError> {
    actor
        .require_permission(Permission::ExportRosters)
        .validate_custom()?;

    let students = list_students(db.inner()).await.validate_custom()?;
    let leaders = list_team_leaders(db.inner()).await.validate_custom()?;
    let rows = project_students(&students, &leaders);

    Ok(CsvExport::attachment("students.csv", students_csv(&rows)))
}

#[get("/export/teams")]
pub async fn api_export_teams(
    actor: Actor,
    db: &State<Pool<Sqlite>>,
) -> Result<CsvExport, ApiError> {
    actor
        .require_permission(Permission::ExportRosters)
        .validate_custom()?;

    let leaders = list_team_leaders(db.inner()).await.validate_custom()?;
    let students = list_students(db.inner()).await.validate_custom()?;
    let report = project_teams(&leaders, &students);

    Ok(CsvExport::attachment("teams.csv", teams_csv(&report)))
}

#[derive(Serialize, Deserialize)]
pub struct AuditResponse {
    pub consistent: bool,
    pub strict: bool,
    pub issues: Vec<RosterIssue>,
}

#[get("/roster/audit")]
pub async fn api_audit_rosters(
    actor: Actor,
    roster: &State<RosterManager>,
) -> Result<Json<AuditResponse>, ApiError> {
    actor
        .require_permission(Permission::AuditRosters)
        .validate_custom()?;

    let issues = roster.audit_rosters().await.validate_custom()?;

    Ok(Json(AuditResponse {
        consistent: issues.is_empty(),
        strict: roster.policy().strict,
        issues,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct RepairResponse {
    pub repaired: u64,
    pub remaining: Vec<RosterIssue>,
}

#[post("/roster/repair")]
pub async fn api_repair_rosters(
    actor: Actor,
    roster: &State<RosterManager>,
) -> Result<Json<RepairResponse>, ApiError> {
    actor
        .require_permission(Permission::AuditRosters)
        .validate_custom()?;

    let repaired = roster.repair_rosters().await.validate_custom()?;
    let remaining = roster.audit_rosters().await.validate_custom()?;

    Ok(Json(RepairResponse {
        repaired,
        remaining,
    }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
