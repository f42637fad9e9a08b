use rocket::serde::json::Json;
use rocket_db_pools::Connection;

use crate::ballot::{self, ClientMeta};
use crate::candidates;
use crate::db::VotingDB;
use crate::error::AppError;
use crate::models::{
    BallotResponse, CastVoteRequest, SubmitVoteResponse, ValidateTokenRequest,
    ValidateTokenResponse, VoteStatusResponse, VoterSummary,
};
use crate::session;
use crate::token;

// Ballot page data: the voter behind the token, the candidates and the session
#[get("/vote/<vote_token>")]
pub async fn ballot_page(
    mut db: Connection<VotingDB>,
    vote_token: &str,
) -> Result<Json<BallotResponse>, AppError> {
    if !token::is_well_formed(vote_token) {
        return Err(AppError::InvalidToken);
    }

    let voter = ballot::voter_by_token(&mut db, vote_token)
        .await?
        .filter(|v| v.is_verified)
        .ok_or(AppError::InvalidToken)?;

    let voting_session = session::current(&mut db).await?;
    if !voting_session.is_active {
        return Err(AppError::VotingClosed);
    }

    Ok(Json(BallotResponse {
        voter: VoterSummary::from(&voter),
        candidates: candidates::list(&mut db).await?,
        voting_session,
    }))
}

#[post("/vote/<vote_token>/submit", format = "json", data = "<vote_request>")]
pub async fn submit_vote(
    mut db: Connection<VotingDB>,
    client: ClientMeta,
    vote_token: &str,
    vote_request: Json<CastVoteRequest>,
) -> Result<Json<SubmitVoteResponse>, AppError> {
    ballot::cast(&mut db, vote_token, &vote_request.candidate_id, &client).await?;

    Ok(Json(SubmitVoteResponse {
        success: true,
        message: "Your vote has been recorded".into(),
    }))
}

#[get("/vote/<vote_token>/status")]
pub async fn vote_status(
    mut db: Connection<VotingDB>,
    vote_token: &str,
) -> Result<Json<VoteStatusResponse>, AppError> {
    if !token::is_well_formed(vote_token) {
        return Err(AppError::InvalidToken);
    }

    let voter = ballot::voter_by_token(&mut db, vote_token)
        .await?
        .ok_or(AppError::InvalidToken)?;

    Ok(Json(VoteStatusResponse {
        voter: VoterSummary::from(&voter),
    }))
}

#[post("/vote/validate-token", format = "json", data = "<request>")]
pub async fn validate_token(
    mut db: Connection<VotingDB>,
    request: Json<ValidateTokenRequest>,
) -> Result<Json<ValidateTokenResponse>, AppError> {
    let voter = ballot::validate(&mut db, &request.token).await?;

    Ok(Json(ValidateTokenResponse {
        valid: true,
        message: "Token is valid".into(),
        vote_url: format!("/vote/{}", voter.vote_token.unwrap_or_default()),
    }))
}
