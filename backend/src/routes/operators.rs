use rocket::serde::json::Json;
use rocket_db_pools::Connection;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{CreateCommitteeRequest, OperatorInfo, SetActiveRequest};
use crate::operators::{self, CommitteeFields};

#[get("/admin/committee")]
pub async fn list_committee(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<Vec<OperatorInfo>>, AppError> {
    operator.require(Capability::ManageOperators)?;
    Ok(Json(operators::list_committee(&mut db).await?))
}

#[post("/admin/committee", format = "json", data = "<request>")]
pub async fn create_committee(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    request: Json<CreateCommitteeRequest>,
) -> Result<Json<OperatorInfo>, AppError> {
    operator.require(Capability::ManageOperators)?;
    let fields = CommitteeFields::validate(request.into_inner())?;
    Ok(Json(operators::create_committee(&mut db, fields).await?))
}

#[post("/admin/committee/<id>/active", format = "json", data = "<request>")]
pub async fn set_committee_active(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    id: &str,
    request: Json<SetActiveRequest>,
) -> Result<Json<OperatorInfo>, AppError> {
    operator.require(Capability::ManageOperators)?;
    Ok(Json(
        operators::set_committee_active(&mut db, id, request.is_active).await?,
    ))
}
