use chrono::NaiveDateTime;
use rocket::serde::{Deserialize, Serialize};
use rocket_db_pools::diesel::prelude::*;

use crate::schema::{
    candidates, operator_sessions, operators, settings, voters, votes, voting_sessions,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = operators)]
pub struct Operator {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = operators)]
pub struct NewOperator {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = operator_sessions)]
pub struct NewOperatorSession {
    pub session_token: String,
    pub operator_id: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
#[diesel(table_name = candidates)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub vision: String,
    pub mission: String,
    pub photo: Option<String>,
    pub order_number: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = candidates)]
pub struct NewCandidate {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub vision: String,
    pub mission: String,
    pub photo: Option<String>,
    pub order_number: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// `photo: None` leaves the stored photo untouched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = candidates)]
pub struct CandidateChanges {
    pub name: String,
    pub class_name: String,
    pub vision: String,
    pub mission: String,
    pub photo: Option<String>,
    pub order_number: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
#[diesel(table_name = voters)]
pub struct Voter {
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub nisn: String,
    pub is_verified: bool,
    pub vote_token: Option<String>,
    pub has_voted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = voters)]
pub struct NewVoter {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub nisn: String,
    pub is_verified: bool,
    pub vote_token: Option<String>,
    pub has_voted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = voters)]
pub struct VoterChanges {
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub nisn: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
#[diesel(table_name = votes)]
pub struct Vote {
    pub id: String,
    pub voter_id: String,
    pub candidate_id: String,
    pub vote_token: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = votes)]
pub struct NewVote {
    pub id: String,
    pub voter_id: String,
    pub candidate_id: String,
    pub vote_token: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
#[diesel(table_name = voting_sessions)]
pub struct VotingSession {
    pub id: String,
    pub is_active: bool,
    pub description: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = voting_sessions)]
pub struct NewVotingSession {
    pub id: String,
    pub is_active: bool,
    pub description: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = settings)]
pub struct Setting {
    pub key_name: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = settings)]
pub struct NewSetting {
    pub key_name: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}

// Request payloads

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct CreateVoterRequest {
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub nisn: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct UpdateVoterRequest {
    pub name: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub nisn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub candidate_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct UpdateVotingStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct CreateCommitteeRequest {
    pub username: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}

// Responses

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct OperatorInfo {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
}

impl From<Operator> for OperatorInfo {
    fn from(op: Operator) -> Self {
        OperatorInfo {
            id: op.id,
            username: op.username,
            name: op.name,
            role: op.role,
            is_active: op.is_active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VotedFor {
    pub candidate_name: String,
    pub order_number: i32,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VoterWithVote {
    #[serde(flatten)]
    pub voter: Voter,
    pub voted_for: Option<VotedFor>,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VoterSummary {
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub has_voted: bool,
}

impl From<&Voter> for VoterSummary {
    fn from(voter: &Voter) -> Self {
        VoterSummary {
            name: voter.name.clone(),
            class_name: voter.class_name.clone(),
            has_voted: voter.has_voted,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct BallotResponse {
    pub voter: VoterSummary,
    pub candidates: Vec<Candidate>,
    pub voting_session: VotingSession,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct VoteStatusResponse {
    pub voter: VoterSummary,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct SubmitVoteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub message: String,
    pub vote_url: String,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        ActionResponse {
            success: true,
            message: message.into(),
            count: None,
        }
    }

    pub fn counted(message: impl Into<String>, count: usize) -> Self {
        ActionResponse {
            success: true,
            message: message.into(),
            count: Some(count),
        }
    }
}
