use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket_db_pools::Connection;
use tracing::{info, warn};

use crate::auth::{self, AuthenticatedOperator, SESSION_COOKIE};
use crate::ballot::ClientMeta;
use crate::config::AppConfig;
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{ActionResponse, LoginRequest};

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Me {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: &'static str,
}

impl From<AuthenticatedOperator> for Me {
    fn from(op: AuthenticatedOperator) -> Self {
        Me {
            id: op.id,
            username: op.username,
            name: op.name,
            role: op.role.as_str(),
        }
    }
}

#[post("/auth/login", format = "json", data = "<login>")]
pub async fn login(
    mut db: Connection<VotingDB>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    client: ClientMeta,
    login: Json<LoginRequest>,
) -> Result<Json<Me>, AppError> {
    let result = auth::login(
        &mut db,
        login.username.trim(),
        &login.password,
        Some(client.ip_address.clone()),
        config.session_ttl_hours,
    )
    .await;

    let (operator, token) = match result {
        Ok(ok) => ok,
        Err(e) => {
            // Clear any stale cookie
            cookies.remove(Cookie::from(SESSION_COOKIE));
            if matches!(e, AppError::Unauthorized) {
                warn!(username = %login.username, ip = %client.ip_address, "Failed login");
            }
            return Err(e);
        }
    };

    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookies.add(cookie);

    info!(username = %operator.username, role = operator.role.as_str(), "Operator logged in");
    Ok(Json(operator.into()))
}

#[post("/auth/logout")]
pub async fn logout(
    mut db: Connection<VotingDB>,
    cookies: &CookieJar<'_>,
) -> Result<Json<ActionResponse>, AppError> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        auth::logout(&mut db, cookie.value()).await?;
        cookies.remove(Cookie::from(SESSION_COOKIE));
    }
    Ok(Json(ActionResponse::ok("Logged out")))
}

#[get("/auth/me")]
pub fn me(operator: AuthenticatedOperator) -> Json<Me> {
    Json(operator.into())
}
