use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub type StaffId = i64;
pub type StudentId = i64;
pub type TeamLeaderId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Gender::Male),
            "f" | "female" => Ok(Gender::Female),
            "o" | "other" => Ok(Gender::Other),
            other => Err(AppError::Validation(format!("Unknown gender: {}", other))),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of student ids a team leader currently holds, read from the
/// `team_rosters` rows. Membership changes go through `db::add_to_roster`
/// and `db::remove_from_roster`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Roster(BTreeSet<StudentId>);

impl Roster {
    pub fn contains(&self, student_id: StudentId) -> bool {
        self.0.contains(&student_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = StudentId> + '_ {
        self.0.iter().copied()
    }

    // GROUP_CONCAT output, e.g. "3,7,12"
    fn from_concat(concat: Option<&str>) -> Self {
        concat
            .unwrap_or_default()
            .split(',')
            .filter_map(|id| id.trim().parse::<StudentId>().ok())
            .collect()
    }
}

impl FromIterator<StudentId> for Roster {
    fn from_iter<I: IntoIterator<Item = StudentId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Staff {
    pub id: StaffId,
    pub name: String,
    pub username: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStaff {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub username: Option<String>,
}

impl From<DbStaff> for Staff {
    fn from(staff: DbStaff) -> Self {
        Self {
            id: staff.id.unwrap_or_default(),
            name: staff.name.unwrap_or_default(),
            username: staff.username.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPrincipal {
    pub id: Option<i64>,
    pub username: Option<String>,
}

impl From<DbPrincipal> for Principal {
    fn from(principal: DbPrincipal) -> Self {
        Self {
            id: principal.id.unwrap_or_default(),
            username: principal.username.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamLeader {
    pub id: TeamLeaderId,
    pub name: String,
    pub gender: Gender,
    pub age_undertaken: i64,
    pub roster: Roster,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbTeamLeader {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub age_undertaken: Option<i64>,
    pub roster: Option<String>,
}

impl TryFrom<DbTeamLeader> for TeamLeader {
    type Error = AppError;

    fn try_from(db: DbTeamLeader) -> Result<Self, Self::Error> {
        let id = db.id.unwrap_or_default();
        let gender = db
            .gender
            .as_deref()
            .unwrap_or_default()
            .parse::<Gender>()
            .map_err(|e| AppError::Internal(format!("Team leader {} is corrupt: {}", id, e)))?;

        Ok(Self {
            id,
            name: db.name.unwrap_or_default(),
            gender,
            age_undertaken: db.age_undertaken.unwrap_or_default(),
            roster: Roster::from_concat(db.roster.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub phone: String,
    pub address: String,
    pub team_leader_id: Option<TeamLeaderId>,
    pub registered_by: Option<StaffId>,
    pub registered_date: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub team_leader_id: Option<i64>,
    pub registered_by: Option<i64>,
    pub registered_date: Option<NaiveDateTime>,
}

impl TryFrom<DbStudent> for Student {
    type Error = AppError;

    fn try_from(db: DbStudent) -> Result<Self, Self::Error> {
        let id = db.id.unwrap_or_default();
        let gender = db
            .gender
            .as_deref()
            .unwrap_or_default()
            .parse::<Gender>()
            .map_err(|e| AppError::Internal(format!("Student {} is corrupt: {}", id, e)))?;

        Ok(Self {
            id,
            name: db.name.unwrap_or_default(),
            age: db.age.unwrap_or_default(),
            gender,
            phone: db.phone.unwrap_or_default(),
            address: db.address.unwrap_or_default(),
            team_leader_id: db.team_leader_id,
            registered_by: db.registered_by,
            registered_date: db
                .registered_date
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Fields captured by staff when registering a student. The team leader,
/// registering staff member and registration date are assigned by the
/// roster manager.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct NewTeamLeader {
    pub name: String,
    pub gender: Gender,
    pub age_undertaken: i64,
}
