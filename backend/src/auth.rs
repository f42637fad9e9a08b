// Operator authentication: password checks, cookie-backed sessions and role capabilities

use chrono::{Duration, NaiveDateTime};
use diesel_async::AsyncMysqlConnection;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_db_pools::Connection;
use rocket_db_pools::diesel::prelude::*;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::{VotingDB, now};
use crate::error::AppError;
use crate::models::{NewOperatorSession, Operator};
use crate::schema::{operator_sessions, operators};

pub const SESSION_COOKIE: &str = "operator_auth";
pub const BCRYPT_COST: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Committee,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Committee => "committee",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "committee" => Some(Role::Committee),
            _ => None,
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Committee => matches!(
                capability,
                Capability::ViewVoters | Capability::VerifyVoters | Capability::ViewReports
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewVoters,
    VerifyVoters,
    ViewReports,
    ManageVoters,
    ResetVerification,
    ResetVotes,
    ManageCandidates,
    ControlSession,
    ManageSettings,
    ManageOperators,
}

/// An operator whose session cookie resolved to a live session.
#[derive(Debug, Clone)]
pub struct AuthenticatedOperator {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: Role,
}

impl AuthenticatedOperator {
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.role.can(capability) {
            Ok(())
        } else {
            warn!(username = %self.username, ?capability, "capability denied");
            Err(AppError::Forbidden)
        }
    }

    fn from_operator(op: Operator) -> Option<Self> {
        let role = Role::parse(&op.role)?;
        Some(AuthenticatedOperator {
            id: op.id,
            username: op.username,
            name: op.name,
            role,
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedOperator {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(token) = req
            .cookies()
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_owned())
        else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let Some(mut db) = req.guard::<Connection<VotingDB>>().await.succeeded() else {
            return Outcome::Error((Status::ServiceUnavailable, ()));
        };

        match find_session_operator(&mut db, &token, now()).await {
            Ok(Some(operator)) => Outcome::Success(operator),
            Ok(None) => Outcome::Error((Status::Unauthorized, ())),
            Err(e) => {
                error!("Error resolving operator session: {}", e);
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

async fn find_session_operator(
    conn: &mut AsyncMysqlConnection,
    token: &str,
    at: NaiveDateTime,
) -> QueryResult<Option<AuthenticatedOperator>> {
    let operator = operator_sessions::table
        .inner_join(operators::table)
        .filter(operator_sessions::session_token.eq(token))
        .filter(operator_sessions::expires_at.gt(at))
        .filter(operators::is_active.eq(true))
        .select(Operator::as_select())
        .first::<Operator>(conn)
        .await
        .optional()?;

    Ok(operator.and_then(AuthenticatedOperator::from_operator))
}

/// Checks credentials and opens a session, returning the operator and the cookie value.
pub async fn login(
    conn: &mut AsyncMysqlConnection,
    username: &str,
    password: &str,
    ip_address: Option<String>,
    ttl_hours: i64,
) -> Result<(AuthenticatedOperator, String), AppError> {
    let operator = operators::table
        .filter(operators::username.eq(username))
        .select(Operator::as_select())
        .first::<Operator>(conn)
        .await
        .optional()?
        .filter(|op| op.is_active)
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(password, &operator.password_hash).await? {
        return Err(AppError::Unauthorized);
    }

    let operator = AuthenticatedOperator::from_operator(operator)
        .ok_or_else(|| AppError::Internal("operator has an unknown role".into()))?;

    let at = now();
    diesel::delete(operator_sessions::table.filter(operator_sessions::expires_at.le(at)))
        .execute(conn)
        .await?;

    let token = Uuid::new_v4().to_string();
    let session = NewOperatorSession {
        session_token: token.clone(),
        operator_id: operator.id.clone(),
        created_at: at,
        expires_at: at + Duration::hours(ttl_hours),
        ip_address,
    };

    diesel::insert_into(operator_sessions::table)
        .values(&session)
        .execute(conn)
        .await?;

    Ok((operator, token))
}

pub async fn logout(conn: &mut AsyncMysqlConnection, token: &str) -> QueryResult<usize> {
    diesel::delete(operator_sessions::table.find(token))
        .execute(conn)
        .await
}

pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_owned();
    let hashed =
        rocket::tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
            .await??;
    Ok(hashed)
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    Ok(rocket::tokio::task::spawn_blocking(move || check_password(&password, &hash)).await?)
}

/// Malformed hashes count as a mismatch.
pub fn check_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(role: Role) -> AuthenticatedOperator {
        AuthenticatedOperator {
            id: "op-1".into(),
            username: "panitia".into(),
            name: "Panitia".into(),
            role,
        }
    }

    #[test]
    fn admin_holds_every_capability() {
        let admin = operator(Role::Admin);
        for cap in [
            Capability::ViewVoters,
            Capability::VerifyVoters,
            Capability::ViewReports,
            Capability::ManageVoters,
            Capability::ResetVerification,
            Capability::ResetVotes,
            Capability::ManageCandidates,
            Capability::ControlSession,
            Capability::ManageSettings,
            Capability::ManageOperators,
        ] {
            assert!(admin.require(cap).is_ok(), "{cap:?}");
        }
    }

    #[test]
    fn committee_can_only_view_and_verify() {
        let committee = operator(Role::Committee);
        assert!(committee.require(Capability::ViewVoters).is_ok());
        assert!(committee.require(Capability::VerifyVoters).is_ok());
        assert!(committee.require(Capability::ViewReports).is_ok());
        assert!(matches!(
            committee.require(Capability::ResetVerification),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            committee.require(Capability::ControlSession),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            committee.require(Capability::ManageCandidates),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn role_names_round_trip() {
        assert_eq!(Role::parse(Role::Admin.as_str()), Some(Role::Admin));
        assert_eq!(Role::parse(Role::Committee.as_str()), Some(Role::Committee));
        assert_eq!(Role::parse("verifikator"), None);
    }

    #[test]
    fn password_check_accepts_only_the_right_password() {
        let hash = bcrypt::hash("panitia123", 4).unwrap();
        assert!(check_password("panitia123", &hash));
        assert!(!check_password("panitia124", &hash));
        assert!(!check_password("panitia123", "not-a-bcrypt-hash"));
    }

    #[test]
    fn unknown_role_rows_are_not_authenticated() {
        let op = Operator {
            id: "x".into(),
            username: "x".into(),
            password_hash: String::new(),
            name: "x".into(),
            role: "superuser".into(),
            is_active: true,
            created_at: now(),
        };
        assert!(AuthenticatedOperator::from_operator(op).is_none());
    }
}
