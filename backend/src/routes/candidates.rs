use rocket::State;
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket_db_pools::Connection;
use tracing::info;

use crate::auth::{AuthenticatedOperator, Capability};
use crate::candidates::{self, CandidateFields, CandidateForm};
use crate::config::AppConfig;
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{ActionResponse, Candidate};

fn fields(form: &CandidateForm<'_>, config: &AppConfig) -> Result<CandidateFields, AppError> {
    CandidateFields::validate(
        &form.name,
        &form.class_name,
        &form.vision,
        &form.mission,
        form.order_number,
        config.max_candidates,
    )
}

// Public candidate list, in ballot order
#[get("/candidates")]
pub async fn list_candidates(mut db: Connection<VotingDB>) -> Result<Json<Vec<Candidate>>, AppError> {
    Ok(Json(candidates::list(&mut db).await?))
}

#[post("/admin/candidates", data = "<form>")]
pub async fn create_candidate(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    config: &State<AppConfig>,
    mut form: Form<CandidateForm<'_>>,
) -> Result<Json<Candidate>, AppError> {
    operator.require(Capability::ManageCandidates)?;

    let fields = fields(&form, config)?;
    let photo = candidates::store_photo(form.photo.as_mut(), &config.uploads_dir).await?;
    let candidate = match candidates::create(&mut db, fields, photo.clone()).await {
        Ok(candidate) => candidate,
        Err(e) => {
            candidates::discard_photo(&config.uploads_dir, photo.as_deref()).await;
            return Err(e);
        }
    };

    info!(operator = %operator.username, candidate_id = %candidate.id, "Candidate created");
    Ok(Json(candidate))
}

#[put("/admin/candidates/<id>", data = "<form>")]
pub async fn update_candidate(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    config: &State<AppConfig>,
    id: &str,
    mut form: Form<CandidateForm<'_>>,
) -> Result<Json<Candidate>, AppError> {
    operator.require(Capability::ManageCandidates)?;

    let fields = fields(&form, config)?;
    let existing = candidates::find(&mut db, id).await?;
    let uploaded = candidates::store_photo(form.photo.as_mut(), &config.uploads_dir).await?;
    let photo = uploaded.clone().or_else(|| existing.photo.clone());

    match candidates::update(&mut db, id, fields, photo).await {
        Ok(candidate) => {
            if uploaded.is_some() && existing.photo != candidate.photo {
                candidates::discard_photo(&config.uploads_dir, existing.photo.as_deref()).await;
            }
            Ok(Json(candidate))
        }
        Err(e) => {
            candidates::discard_photo(&config.uploads_dir, uploaded.as_deref()).await;
            Err(e)
        }
    }
}

#[delete("/admin/candidates/<id>")]
pub async fn delete_candidate(
    mut db: Connection<VotingDB>,
    operator: AuthenticatedOperator,
    config: &State<AppConfig>,
    id: &str,
) -> Result<Json<ActionResponse>, AppError> {
    operator.require(Capability::ManageCandidates)?;

    let candidate = candidates::delete(&mut db, id).await?;
    candidates::discard_photo(&config.uploads_dir, candidate.photo.as_deref()).await;
    info!(operator = %operator.username, candidate_id = id, "Candidate deleted");
    Ok(Json(ActionResponse::ok(format!(
        "{} has been deleted",
        candidate.name
    ))))
}
