use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::tokio::io::AsyncReadExt;
use rocket_db_pools::Connection;
use tracing::info;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{
    ActionResponse, CreateVoterRequest, UpdateVoterRequest, Voter, VoterWithVote,
};
use crate::roster::{self, ImportReport};
use crate::routes::Download;
use crate::voters::{self, VoterFilter};

#[derive(FromForm)]
pub struct RosterUpload<'r> {
    pub file: TempFile<'r>,
}

#[get("/admin/voters?<status>&<q>")]
pub async fn list_voters(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    status: Option<&str>,
    q: Option<&str>,
) -> Result<Json<Vec<VoterWithVote>>, AppError> {
    operator.require(Capability::ViewVoters)?;
    let filter = VoterFilter::parse(status)?;
    Ok(Json(voters::list(&mut db, filter, q).await?))
}

#[post("/admin/voters", format = "json", data = "<request>")]
pub async fn create_voter(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    request: Json<CreateVoterRequest>,
) -> Result<Json<Voter>, AppError> {
    operator.require(Capability::ManageVoters)?;
    let new_voter = voters::validated_voter(&request.name, &request.class_name, &request.nisn)?;
    let voter = voters::create(&mut db, new_voter).await?;
    info!(operator = %operator.username, voter_id = %voter.id, "Voter created");
    Ok(Json(voter))
}

#[put("/admin/voters/<id>", format = "json", data = "<request>")]
pub async fn update_voter(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    id: &str,
    request: Json<UpdateVoterRequest>,
) -> Result<Json<Voter>, AppError> {
    operator.require(Capability::ManageVoters)?;
    let changes = voters::validated_changes(request.into_inner())?;
    Ok(Json(voters::update(&mut db, id, changes).await?))
}

#[delete("/admin/voters/<id>")]
pub async fn delete_voter(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    id: &str,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ManageVoters)?;
    let voter = voters::delete(&mut db, id).await?;
    info!(operator = %operator.username, voter_id = id, "Voter deleted");
    Ok(Json(ActionResponse::ok(format!("{} has been deleted", voter.name))))
}

#[post("/admin/voters/import", data = "<upload>")]
pub async fn import_voters(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    upload: Form<RosterUpload<'_>>,
) -> Result<Json<ImportReport>, AppError> {
    operator.require(Capability::ManageVoters)?;

    let file = &upload.file;
    let is_csv = file
        .raw_name()
        .map(|name| {
            name.dangerous_unsafe_unsanitized_raw()
                .as_str()
                .to_ascii_lowercase()
                .ends_with(".csv")
        })
        .unwrap_or(false);
    if !is_csv {
        return Err(AppError::Validation("only .csv files are accepted".into()));
    }
    if file.len() == 0 {
        return Err(AppError::Validation("the uploaded file is empty".into()));
    }

    let mut bytes = Vec::new();
    file.open().await?.read_to_end(&mut bytes).await?;

    let report = roster::import(&mut db, &roster::decode(&bytes)).await?;
    info!(operator = %operator.username, imported = report.imported, "Voter import finished");
    Ok(Json(report))
}

#[get("/admin/voters/export")]
pub async fn export_voters_csv(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Download, AppError> {
    operator.require(Capability::ManageVoters)?;
    let all = voters::all(&mut db).await?;
    Ok(Download::csv("voters.csv", roster::export_csv(&all)))
}

#[get("/admin/voters/export.xlsx")]
pub async fn export_voters_xlsx(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Download, AppError> {
    operator.require(Capability::ManageVoters)?;
    let all = voters::all(&mut db).await?;
    Ok(Download::xlsx("voters.xlsx", roster::export_xlsx(&all)?))
}

#[get("/admin/voters/template")]
pub fn import_template(operator: AuthenticatedOperator) -> Result<Download, AppError> {
    operator.require(Capability::ManageVoters)?;
    Ok(Download::csv("voter-template.csv", roster::TEMPLATE_CSV))
}

// Issues a fresh voting token; any earlier token stops working
#[post("/admin/voters/<id>/verify")]
pub async fn verify_voter(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    id: &str,
) -> Result<Json<Voter>, AppError> {
    operator.require(Capability::VerifyVoters)?;
    let voter = voters::verify(&mut db, id).await?;
    info!(operator = %operator.username, voter_id = id, "Voter verified");
    Ok(Json(voter))
}

#[post("/admin/voters/<id>/reset-verification")]
pub async fn reset_verification(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    id: &str,
) -> Result<Json<Voter>, AppError> {
    operator.require(Capability::ResetVerification)?;
    let voter = voters::reset_verification(&mut db, id).await?;
    info!(operator = %operator.username, voter_id = id, "Verification reset");
    Ok(Json(voter))
}

#[post("/admin/voters/reset-all-verifications")]
pub async fn reset_all_verifications(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ResetVerification)?;
    let reset = voters::reset_all_verifications(&mut db).await?;
    info!(operator = %operator.username, reset, "All verifications reset");
    Ok(Json(ActionResponse::counted(
        format!("Reset verification of {reset} voter(s)"),
        reset,
    )))
}
