use sqlx::{Executor, Sqlite};
use tracing::{info, instrument};

use crate::db::{TeamLeaderFilter, find_team_leaders_where};
use crate::error::AppError;
use crate::models::{Gender, TeamLeader};

pub fn is_eligible(leader: &TeamLeader, age: i64, gender: Gender) -> bool {
    leader.age_undertaken == age && leader.gender == gender
}

/// Picks the leader with the smallest roster. Ties go to the lowest id,
/// i.e. the leader created first.
pub fn select_least_loaded<'a, I>(leaders: I) -> Option<&'a TeamLeader>
where
    I: IntoIterator<Item = &'a TeamLeader>,
{
    leaders
        .into_iter()
        .min_by_key(|leader| (leader.roster.len(), leader.id))
}

/// Chooses the team leader a new student of the given age and gender
/// should join. Read-only.
#[instrument(skip(executor))]
pub async fn select_team_leader(
    executor: impl Executor<'_, Database = Sqlite>,
    age: i64,
    gender: Gender,
) -> Result<TeamLeader, AppError> {
    let candidates =
        find_team_leaders_where(executor, TeamLeaderFilter::eligible_for(age, gender)).await?;

    let selected = select_least_loaded(
        candidates
            .iter()
            .filter(|leader| is_eligible(leader, age, gender)),
    )
    .cloned();

    match selected {
        Some(leader) => {
            info!(
                team_leader_id = leader.id,
                load = leader.roster.len(),
                candidates = candidates.len(),
                "Selected team leader"
            );
            Ok(leader)
        }
        None => Err(AppError::NoEligibleTeam { age, gender }),
    }
}
