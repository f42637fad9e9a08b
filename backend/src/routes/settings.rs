use std::collections::BTreeMap;

use rocket::serde::json::Json;
use rocket_db_pools::Connection;
use tracing::info;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::ActionResponse;
use crate::settings;

#[get("/settings")]
pub async fn get_settings(
    mut db: Connection<VotingDB>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    Ok(Json(settings::all(&mut db).await?))
}

#[post("/admin/settings", format = "json", data = "<entries>")]
pub async fn save_settings(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    entries: Json<BTreeMap<String, String>>,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ManageSettings)?;
    let saved = settings::upsert(&mut db, entries.into_inner()).await?;
    info!(operator = %operator.username, saved, "Settings saved");
    Ok(Json(ActionResponse::counted("Settings saved", saved)))
}
