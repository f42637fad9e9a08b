use rocket::serde::json::Json;
use rocket_db_pools::Connection;
use tracing::info;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{ActionResponse, UpdateVotingStatusRequest, VotingSession};
use crate::session;
use crate::voters;

#[get("/admin/voting-session")]
pub async fn get_voting_session(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<VotingSession>, AppError> {
    operator.require(Capability::ViewReports)?;
    Ok(Json(session::current(&mut db).await?))
}

// Opens or closes the ballot box
#[post("/admin/voting-session", format = "json", data = "<status_request>")]
pub async fn set_voting_session(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    status_request: Json<UpdateVotingStatusRequest>,
) -> Result<Json<VotingSession>, AppError> {
    operator.require(Capability::ControlSession)?;

    let voting_session = session::set_active(&mut db, status_request.is_active).await?;
    info!(
        operator = %operator.username,
        active = voting_session.is_active,
        "Voting session toggled"
    );
    Ok(Json(voting_session))
}

#[post("/admin/reset-voting")]
pub async fn reset_voting(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ResetVotes)?;

    let summary = session::reset_voting_data(&mut db).await?;
    info!(operator = %operator.username, "Voting data reset requested");
    Ok(Json(ActionResponse::counted(
        format!(
            "Deleted {} vote(s) and reset {} voter(s)",
            summary.votes_deleted, summary.voters_reset
        ),
        summary.votes_deleted,
    )))
}

#[delete("/admin/votes")]
pub async fn reset_all_votes(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ResetVotes)?;

    let deleted = voters::reset_all_votes(&mut db).await?;
    info!(operator = %operator.username, deleted, "All votes reset");
    Ok(Json(ActionResponse::counted(
        format!("Deleted {deleted} vote(s)"),
        deleted,
    )))
}

#[delete("/admin/votes/<voter_id>")]
pub async fn reset_vote(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    voter_id: &str,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ResetVotes)?;

    let voter = voters::reset_vote(&mut db, voter_id).await?;
    info!(operator = %operator.username, voter_id, "Vote reset");
    Ok(Json(ActionResponse::ok(format!(
        "Vote of {} has been reset",
        voter.name
    ))))
}
