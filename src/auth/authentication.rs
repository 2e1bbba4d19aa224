use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::Instrument;

use super::{Actor, Role};
use crate::db::{find_principal, find_staff, get_session_by_token};

pub const SESSION_COOKIE: &str = "session_token";

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Actor {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        resolve_actor(request)
            .instrument(tracing::info_span!("actor_auth_guard"))
            .await
    }
}

async fn resolve_actor(request: &Request<'_>) -> Outcome<Actor, ()> {
    let token = request
        .cookies()
        .get_private(SESSION_COOKIE)
        .map(|c| c.value().to_string());

    let Some(token) = token else {
        return Outcome::Error((Status::Unauthorized, ()));
    };

    let Some(db) = request.rocket().state::<SqlitePool>() else {
        tracing::error!("Database pool not found in managed state");
        return Outcome::Error((Status::InternalServerError, ()));
    };

    let session = match get_session_by_token(db, &token).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = ?err, "Invalid session token");
            return Outcome::Error((Status::Unauthorized, ()));
        }
    };

    if !session.is_valid() {
        tracing::warn!(session_id = session.id, "Session token expired");
        return Outcome::Error((Status::Unauthorized, ()));
    }

    let actor = match session.role {
        Role::Staff => find_staff(db, session.account_id).await.map(Actor::from),
        Role::Principal => find_principal(db, session.account_id)
            .await
            .map(Actor::from),
    };

    match actor {
        Ok(actor) => {
            tracing::info!(
                username = %actor.username,
                role = %actor.role,
                "Actor authenticated via session token"
            );
            Outcome::Success(actor)
        }
        Err(err) => {
            tracing::error!(
                account_id = session.account_id,
                error = ?err,
                "Failed to load account for valid session"
            );
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    Custom(
        Status::Unauthorized,
        Json(json!({
            "error": "Unauthorized",
            "message": "Authentication required"
        })),
    )
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    tracing::warn!("Forbidden access attempt");
    Custom(
        Status::Forbidden,
        Json(json!({
            "error": "Forbidden",
            "message": "You don't have permission to perform this action"
        })),
    )
}
