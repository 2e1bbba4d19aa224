use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Gender, Student, StudentId, TeamLeader, TeamLeaderId};

pub const NOT_ASSIGNED: &str = "Not Assigned";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: StudentId,
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub phone: String,
    pub address: String,
    pub team_leader_id: Option<TeamLeaderId>,
    pub team_leader: String,
    pub registered_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummaryRow {
    pub team_leader_id: TeamLeaderId,
    pub name: String,
    pub age_undertaken: i64,
    pub gender: Gender,
    pub student_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: StudentId,
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDetail {
    pub summary: TeamSummaryRow,
    pub students: Vec<TeamMember>,
}

/// Teams sorted by age group, with the members of each team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamReport {
    pub teams: Vec<TeamDetail>,
}

impl TeamReport {
    pub fn summary(&self) -> impl Iterator<Item = &TeamSummaryRow> {
        self.teams.iter().map(|t| &t.summary)
    }
}

/// One team as shown on the teams screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamView {
    pub id: TeamLeaderId,
    pub name: String,
    pub gender: Gender,
    pub age_undertaken: i64,
    pub student_count: usize,
    pub students: Vec<TeamMember>,
}

impl From<&Student> for TeamMember {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            name: student.name.clone(),
            age: student.age,
            gender: student.gender,
            phone: student.phone.clone(),
        }
    }
}

fn members(leader: &TeamLeader, by_id: &HashMap<StudentId, &Student>) -> Vec<TeamMember> {
    leader
        .roster
        .iter()
        .filter_map(|id| by_id.get(&id).map(|s| TeamMember::from(*s)))
        .collect()
}

fn index_students(students: &[Student]) -> HashMap<StudentId, &Student> {
    students.iter().map(|s| (s.id, s)).collect()
}

pub fn project_students(students: &[Student], leaders: &[TeamLeader]) -> Vec<StudentRow> {
    let names: HashMap<TeamLeaderId, &str> =
        leaders.iter().map(|l| (l.id, l.name.as_str())).collect();

    students
        .iter()
        .map(|student| StudentRow {
            id: student.id,
            name: student.name.clone(),
            age: student.age,
            gender: student.gender,
            phone: student.phone.clone(),
            address: student.address.clone(),
            team_leader_id: student.team_leader_id,
            team_leader: student
                .team_leader_id
                .and_then(|id| names.get(&id))
                .unwrap_or(&NOT_ASSIGNED)
                .to_string(),
            registered_date: student.registered_date,
        })
        .collect()
}

pub fn project_teams(leaders: &[TeamLeader], students: &[Student]) -> TeamReport {
    let by_id = index_students(students);
    let mut sorted: Vec<&TeamLeader> = leaders.iter().collect();
    sorted.sort_by_key(|l| l.age_undertaken);

    let teams = sorted
        .into_iter()
        .map(|leader| TeamDetail {
            summary: TeamSummaryRow {
                team_leader_id: leader.id,
                name: leader.name.clone(),
                age_undertaken: leader.age_undertaken,
                gender: leader.gender,
                student_count: leader.roster.len(),
            },
            students: members(leader, &by_id),
        })
        .collect();

    TeamReport { teams }
}

pub fn team_views(leaders: &[TeamLeader], students: &[Student]) -> Vec<TeamView> {
    let by_id = index_students(students);
    leaders
        .iter()
        .map(|leader| TeamView {
            id: leader.id,
            name: leader.name.clone(),
            gender: leader.gender,
            age_undertaken: leader.age_undertaken,
            student_count: leader.roster.len(),
            students: members(leader, &by_id),
        })
        .collect()
}

// CSV

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_row<S: AsRef<str>>(out: &mut String, width: usize, cells: &[S]) {
    let mut fields: Vec<String> = cells.iter().map(|c| escape_field(c.as_ref())).collect();
    fields.resize(width.max(fields.len()), String::new());
    out.push_str(&fields.join(","));
    out.push_str("\r\n");
}

pub fn students_csv(rows: &[StudentRow]) -> String {
    const WIDTH: usize = 6;
    let mut out = String::new();
    push_row(
        &mut out,
        WIDTH,
        &["Name", "Age", "Gender", "Phone", "Address", "Team Leader"],
    );
    for row in rows {
        push_row(
            &mut out,
            WIDTH,
            &[
                row.name.clone(),
                row.age.to_string(),
                row.gender.to_string(),
                row.phone.clone(),
                row.address.clone(),
                row.team_leader.clone(),
            ],
        );
    }
    out
}

pub fn teams_csv(report: &TeamReport) -> String {
    const WIDTH: usize = 4;
    const BLANK: [&str; 0] = [];
    let mut out = String::new();

    push_row(
        &mut out,
        WIDTH,
        &["Team Leader Name", "Age Group", "Gender", "Total Students"],
    );
    for team in report.summary() {
        push_row(
            &mut out,
            WIDTH,
            &[
                team.name.clone(),
                team.age_undertaken.to_string(),
                team.gender.to_string(),
                team.student_count.to_string(),
            ],
        );
    }

    push_row(&mut out, WIDTH, &BLANK);
    push_row(&mut out, WIDTH, &["Detailed Team Information"]);
    push_row(&mut out, WIDTH, &BLANK);

    for team in &report.teams {
        let summary = &team.summary;
        push_row(
            &mut out,
            WIDTH,
            &[format!(
                "Team: {} - Age: {} - Gender: {}",
                summary.name, summary.age_undertaken, summary.gender
            )],
        );

        if summary.student_count > 0 {
            push_row(&mut out, WIDTH, &["Student Name", "Age", "Gender", "Phone"]);
            for student in &team.students {
                push_row(
                    &mut out,
                    WIDTH,
                    &[
                        student.name.clone(),
                        student.age.to_string(),
                        student.gender.to_string(),
                        student.phone.clone(),
                    ],
                );
            }
        } else {
            push_row(&mut out, WIDTH, &["No students in this team"]);
        }

        push_row(&mut out, WIDTH, &BLANK);
    }

    out
}
