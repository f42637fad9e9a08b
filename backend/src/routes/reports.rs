use rocket::serde::json::Json;
use rocket_db_pools::Connection;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::db::VotingDB;
use crate::error::AppError;
use crate::reports::{self, Dashboard, Realtime, VotingStats};

#[get("/admin/dashboard")]
pub async fn dashboard(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<Dashboard>, AppError> {
    operator.require(Capability::ViewReports)?;
    Ok(Json(reports::dashboard(&mut db).await?))
}

#[get("/admin/voting-stats")]
pub async fn voting_stats(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<VotingStats>, AppError> {
    operator.require(Capability::ViewReports)?;
    Ok(Json(reports::voting_stats(&mut db).await?))
}

// Public live monitor
#[get("/monitoring/realtime")]
pub async fn realtime(mut db: Connection<VotingDB>) -> Result<Json<Realtime>, AppError> {
    Ok(Json(reports::realtime(&mut db).await?))
}
