use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::db::{
    add_to_roster, find_student, find_team_leader, insert_student, insert_team_leader,
    list_roster_entries, list_students, remove_from_other_rosters, remove_from_roster,
    rosters_containing, update_student_team_leader,
};
use crate::error::AppError;
use crate::models::{
    NewStudent, NewTeamLeader, StaffId, Student, StudentId, TeamLeader, TeamLeaderId,
};
use crate::roster::selector::select_team_leader;

#[derive(Debug, Clone)]
pub struct RosterPolicy {
    /// Attempts per operation when SQLite reports the database as busy.
    pub max_attempts: u32,
    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
    pub lock_timeout: Duration,
    /// Refuse to reassign when the student's memberships are inconsistent
    /// instead of repairing them along the way.
    pub strict: bool,
}

impl Default for RosterPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(25),
            lock_timeout: Duration::from_secs(5),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub student: Student,
    pub team_leader_id: TeamLeaderId,
    pub team_leader_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    pub student_id: StudentId,
    pub from: Option<TeamLeaderId>,
    pub to: TeamLeaderId,
    /// False when the student already belonged to `to` and nothing was written.
    pub changed: bool,
}

/// A disagreement between a student's team pointer and the rosters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RosterIssue {
    /// The student points at a team whose roster does not list them.
    MissingMembership {
        student_id: StudentId,
        team_leader_id: TeamLeaderId,
    },
    /// A roster lists a student that points elsewhere (or nowhere).
    StaleMembership {
        student_id: StudentId,
        team_leader_id: TeamLeaderId,
    },
    Unassigned { student_id: StudentId },
}

/// Compares pointers against membership rows. Pure.
pub fn find_roster_issues(
    students: &[Student],
    entries: &[(TeamLeaderId, StudentId)],
) -> Vec<RosterIssue> {
    let memberships: BTreeSet<(TeamLeaderId, StudentId)> = entries.iter().copied().collect();
    let mut issues = BTreeSet::new();

    for student in students {
        match student.team_leader_id {
            Some(leader_id) if !memberships.contains(&(leader_id, student.id)) => {
                issues.insert(RosterIssue::MissingMembership {
                    student_id: student.id,
                    team_leader_id: leader_id,
                });
            }
            Some(_) => {}
            None => {
                issues.insert(RosterIssue::Unassigned {
                    student_id: student.id,
                });
            }
        }
    }

    let pointers: HashMap<StudentId, Option<TeamLeaderId>> = students
        .iter()
        .map(|s| (s.id, s.team_leader_id))
        .collect();

    for &(leader_id, student_id) in &memberships {
        if pointers.get(&student_id) != Some(&Some(leader_id)) {
            issues.insert(RosterIssue::StaleMembership {
                student_id,
                team_leader_id: leader_id,
            });
        }
    }

    issues.into_iter().collect()
}

/// Owns every write that touches a roster or a student's team pointer.
///
/// Writes are serialized by an in-process lock and each runs inside a single
/// SQLite transaction, so a failed operation leaves no partial state behind.
pub struct RosterManager {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    policy: RosterPolicy,
}

impl RosterManager {
    pub fn new(pool: SqlitePool, policy: RosterPolicy) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> &RosterPolicy {
        &self.policy
    }

    /// Registers a student with the least-loaded eligible team leader.
    #[instrument(skip(self, student), fields(age = student.age, gender = %student.gender))]
    pub async fn assign_new_student(
        &self,
        student: NewStudent,
        registered_by: StaffId,
    ) -> Result<Assignment, AppError> {
        info!("Assigning new student");
        let student = &student;
        let assignment = self
            .serialized("assign_new_student", move || {
                self.assign_once(student, registered_by)
            })
            .await?;

        info!(
            student_id = assignment.student.id,
            team_leader_id = assignment.team_leader_id,
            "Student assigned"
        );
        Ok(assignment)
    }

    async fn assign_once(
        &self,
        student: &NewStudent,
        registered_by: StaffId,
    ) -> Result<Assignment, AppError> {
        let mut tx = self.pool.begin().await?;

        let leader = select_team_leader(&mut *tx, student.age, student.gender).await?;
        let registered_date = Utc::now().naive_utc();
        let student_id =
            insert_student(&mut *tx, student, leader.id, registered_by, registered_date).await?;
        add_to_roster(&mut *tx, leader.id, student_id).await?;
        let created = find_student(&mut *tx, student_id).await?;

        tx.commit().await?;

        Ok(Assignment {
            student: created,
            team_leader_id: leader.id,
            team_leader_name: leader.name,
        })
    }

    /// Moves a student to another team. The target is not checked against
    /// the student's age or gender.
    #[instrument(skip(self))]
    pub async fn reassign_student(
        &self,
        student_id: StudentId,
        new_team_leader_id: TeamLeaderId,
    ) -> Result<Reassignment, AppError> {
        info!("Reassigning student");
        let outcome = self
            .serialized("reassign_student", move || {
                self.reassign_once(student_id, new_team_leader_id)
            })
            .await?;

        if outcome.changed {
            info!(from = ?outcome.from, to = outcome.to, "Student reassigned");
        } else {
            info!(to = outcome.to, "Student already on requested team");
        }
        Ok(outcome)
    }

    async fn reassign_once(
        &self,
        student_id: StudentId,
        new_team_leader_id: TeamLeaderId,
    ) -> Result<Reassignment, AppError> {
        let mut tx = self.pool.begin().await?;

        let student = find_student(&mut *tx, student_id).await?;
        find_team_leader(&mut *tx, new_team_leader_id).await?;
        let memberships = rosters_containing(&mut *tx, student_id).await?;
        let old_team_leader_id = student.team_leader_id;

        if old_team_leader_id == Some(new_team_leader_id) && memberships == [new_team_leader_id] {
            tx.rollback().await?;
            return Ok(Reassignment {
                student_id,
                from: old_team_leader_id,
                to: new_team_leader_id,
                changed: false,
            });
        }

        let problems = membership_problems(old_team_leader_id, &memberships);
        if !problems.is_empty() {
            if self.policy.strict {
                tx.rollback().await?;
                return Err(AppError::InconsistentRoster(format!(
                    "Student {}: {}",
                    student_id,
                    problems.join("; ")
                )));
            }
            warn!(
                student_id,
                problems = ?problems,
                "Repairing inconsistent roster during reassignment"
            );
        }

        update_student_team_leader(&mut *tx, student_id, new_team_leader_id).await?;
        if let Some(old) = old_team_leader_id.filter(|old| *old != new_team_leader_id) {
            if !remove_from_roster(&mut *tx, old, student_id).await? {
                warn!(
                    student_id,
                    team_leader_id = old,
                    "Student was already missing from old roster"
                );
            }
        }
        let swept = remove_from_other_rosters(&mut *tx, student_id, new_team_leader_id).await?;
        if swept > 0 {
            warn!(student_id, swept, "Removed stale roster memberships");
        }
        add_to_roster(&mut *tx, new_team_leader_id, student_id).await?;

        tx.commit().await?;

        Ok(Reassignment {
            student_id,
            from: old_team_leader_id,
            to: new_team_leader_id,
            changed: true,
        })
    }

    #[instrument(skip(self, leader), fields(name = %leader.name))]
    pub async fn create_team_leader(&self, leader: NewTeamLeader) -> Result<TeamLeader, AppError> {
        info!("Creating team leader");
        let leader = &leader;
        self.serialized("create_team_leader", move || async move {
            let mut tx = self.pool.begin().await?;
            let id = insert_team_leader(&mut *tx, leader).await?;
            let created = find_team_leader(&mut *tx, id).await?;
            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    /// Read-only consistency check of every pointer and membership.
    #[instrument(skip(self))]
    pub async fn audit_rosters(&self) -> Result<Vec<RosterIssue>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let students = list_students(&mut *conn).await?;
        let entries = list_roster_entries(&mut *conn).await?;

        let issues = find_roster_issues(&students, &entries);
        if issues.is_empty() {
            info!(students = students.len(), "Roster audit passed");
        } else {
            warn!(count = issues.len(), issues = ?issues, "Roster audit found issues");
        }
        Ok(issues)
    }

    /// Rebuilds rosters from the students' pointers. Returns how many
    /// membership rows were added or removed.
    #[instrument(skip(self))]
    pub async fn repair_rosters(&self) -> Result<u64, AppError> {
        info!("Repairing rosters");
        let repaired = self
            .serialized("repair_rosters", move || self.repair_once())
            .await?;
        info!(repaired, "Roster repair finished");
        Ok(repaired)
    }

    async fn repair_once(&self) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let students = list_students(&mut *tx).await?;
        let entries = list_roster_entries(&mut *tx).await?;

        let mut changed = 0u64;
        for issue in find_roster_issues(&students, &entries) {
            match issue {
                RosterIssue::MissingMembership {
                    student_id,
                    team_leader_id,
                } => {
                    if add_to_roster(&mut *tx, team_leader_id, student_id).await? {
                        changed += 1;
                    }
                }
                RosterIssue::StaleMembership {
                    student_id,
                    team_leader_id,
                } => {
                    if remove_from_roster(&mut *tx, team_leader_id, student_id).await? {
                        changed += 1;
                    }
                }
                RosterIssue::Unassigned { student_id } => {
                    warn!(student_id, "Student has no team leader, needs a manual reassignment");
                }
            }
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn acquire(&self, operation: &'static str) -> Result<MutexGuard<'_, ()>, AppError> {
        tokio::time::timeout(self.policy.lock_timeout, self.write_lock.lock())
            .await
            .map_err(|_| {
                AppError::Transient(format!(
                    "Timed out after {:?} waiting to run {}",
                    self.policy.lock_timeout, operation
                ))
            })
    }

    /// Runs `attempt` under the write lock, retrying while SQLite reports
    /// contention.
    async fn serialized<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let _guard = self.acquire(operation).await?;

        let mut tries = 0u32;
        loop {
            tries += 1;
            match attempt().await {
                Err(e) if e.is_contention() && tries < self.policy.max_attempts => {
                    warn!(operation, attempt = tries, error = %e, "Store busy, retrying");
                    tokio::time::sleep(self.policy.backoff * tries).await;
                }
                Err(e) if e.is_contention() => {
                    return Err(AppError::Transient(format!(
                        "{} gave up after {} attempts: {}",
                        operation, tries, e
                    )));
                }
                result => return result,
            }
        }
    }
}

fn membership_problems(
    pointer: Option<TeamLeaderId>,
    memberships: &[TeamLeaderId],
) -> Vec<String> {
    let mut problems = Vec::new();
    match pointer {
        None => problems.push("has no team leader".to_string()),
        Some(old) if !memberships.contains(&old) => {
            problems.push(format!("missing from roster of team leader {}", old))
        }
        Some(_) => {}
    }
    for leader_id in memberships.iter().filter(|id| Some(**id) != pointer) {
        problems.push(format!("listed on roster of team leader {}", leader_id));
    }
    problems
}
