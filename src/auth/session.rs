use chrono::{NaiveDateTime, Utc};
use rand::{Rng, distr::Alphanumeric};

use super::Role;
use crate::error::AppError;

const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub role: Role,
    pub account_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSession {
    pub id: Option<i64>,
    pub role: Option<String>,
    pub account_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl TryFrom<DbSession> for Session {
    type Error = AppError;

    fn try_from(db: DbSession) -> Result<Self, Self::Error> {
        let role = Role::from_str(&db.role.unwrap_or_default())
            .map_err(|e| AppError::Authentication(e.to_string()))?;
        let now = Utc::now().naive_utc();

        Ok(Self {
            id: db.id.unwrap_or_default(),
            role,
            account_id: db.account_id.unwrap_or_default(),
            token: db.token.unwrap_or_default(),
            created_at: db.created_at.unwrap_or(now),
            // A row without expiry is treated as already expired.
            expires_at: db.expires_at.unwrap_or(now),
        })
    }
}

impl Session {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}
