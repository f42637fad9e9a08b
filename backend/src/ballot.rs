// Vote casting

use diesel::result::Error as DieselError;
use diesel_async::AsyncMysqlConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_db_pools::diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{is_unique_violation, now};
use crate::error::AppError;
use crate::models::{Candidate, NewVote, Vote, Voter, VotingSession};
use crate::schema::{candidates, voters, votes};
use crate::session;
use crate::token;

const MAX_IP_LEN: usize = 45;
const MAX_USER_AGENT_LEN: usize = 255;

/// Where a ballot came from, kept on the vote row for auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientMeta {
    pub fn from_headers(
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        peer: Option<String>,
        user_agent: Option<&str>,
    ) -> Self {
        let ip = forwarded_for
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| real_ip.map(str::trim).filter(|v| !v.is_empty()))
            .map(String::from)
            .or(peer)
            .unwrap_or_else(|| "unknown".into());

        ClientMeta {
            ip_address: truncate(&ip, MAX_IP_LEN),
            user_agent: truncate(user_agent.unwrap_or("unknown"), MAX_USER_AGENT_LEN),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientMeta {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = req.headers();
        Outcome::Success(ClientMeta::from_headers(
            headers.get_one("X-Forwarded-For"),
            headers.get_one("X-Real-IP"),
            req.client_ip().map(|ip| ip.to_string()),
            headers.get_one("User-Agent"),
        ))
    }
}

/// Evaluates the admission rules against rows read inside the ballot transaction.
/// The checks run in a fixed order: verified token, not voted yet, session active,
/// candidate exists.
pub fn admit<'a>(
    voter: Option<&'a Voter>,
    session: Option<&VotingSession>,
    candidate: Option<&Candidate>,
) -> Result<&'a Voter, AppError> {
    let voter = voter
        .filter(|v| v.is_verified)
        .ok_or(AppError::InvalidToken)?;
    if voter.has_voted {
        return Err(AppError::AlreadyVoted);
    }
    if !session.is_some_and(|s| s.is_active) {
        return Err(AppError::VotingClosed);
    }
    if candidate.is_none() {
        return Err(AppError::UnknownCandidate);
    }
    Ok(voter)
}

pub(crate) async fn voter_by_token(
    conn: &mut AsyncMysqlConnection,
    token: &str,
) -> QueryResult<Option<Voter>> {
    voters::table
        .filter(voters::vote_token.eq(token))
        .select(Voter::as_select())
        .first(conn)
        .await
        .optional()
}

/// Records one ballot.
///
/// The checks and both writes (the vote row and the voter's `has_voted` flag) run in
/// one transaction. The session row is read in share mode and the voter row is locked
/// for update before anything is checked, so a second submission with the same token
/// waits and then sees `has_voted = true`. The unique index on `votes.voter_id` backs
/// this up at the store level.
pub async fn cast(
    conn: &mut AsyncMysqlConnection,
    vote_token: &str,
    candidate_id: &str,
    client: &ClientMeta,
) -> Result<Vote, AppError> {
    if !token::is_well_formed(vote_token) {
        return Err(AppError::InvalidToken);
    }

    let vote = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                // Lock order: session row, then voter row. Bulk resets take the session
                // row first as well.
                let voting_session = session::lock_shared(conn).await?;
                let voter = voters::table
                    .filter(voters::vote_token.eq(vote_token))
                    .select(Voter::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                let candidate = candidates::table
                    .find(candidate_id)
                    .select(Candidate::as_select())
                    .first(conn)
                    .await
                    .optional()?;

                let voter = admit(voter.as_ref(), voting_session.as_ref(), candidate.as_ref())?;

                let at = now();
                let vote = NewVote {
                    id: Uuid::new_v4().to_string(),
                    voter_id: voter.id.clone(),
                    candidate_id: candidate_id.to_string(),
                    vote_token: vote_token.to_string(),
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                    created_at: at,
                };

                diesel::insert_into(votes::table)
                    .values(&vote)
                    .execute(conn)
                    .await
                    .map_err(|e: DieselError| {
                        if is_unique_violation(&e) {
                            AppError::AlreadyVoted
                        } else {
                            e.into()
                        }
                    })?;

                diesel::update(voters::table.find(&voter.id))
                    .set((voters::has_voted.eq(true), voters::updated_at.eq(at)))
                    .execute(conn)
                    .await?;

                Ok(Vote {
                    id: vote.id,
                    voter_id: vote.voter_id,
                    candidate_id: vote.candidate_id,
                    vote_token: vote.vote_token,
                    ip_address: vote.ip_address,
                    user_agent: vote.user_agent,
                    created_at: vote.created_at,
                })
            }
            .scope_boxed()
        })
        .await;

    match &vote {
        Ok(v) => info!(vote_id = %v.id, candidate_id = %v.candidate_id, "Ballot recorded"),
        Err(e @ (AppError::AlreadyVoted | AppError::VotingClosed | AppError::InvalidToken)) => {
            warn!(ip = %client.ip_address, "Ballot rejected: {}", e)
        }
        Err(_) => {}
    }
    vote
}

/// The pre-ballot check a voter runs before opening the ballot page.
pub async fn validate(conn: &mut AsyncMysqlConnection, raw: &str) -> Result<Voter, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation("token must not be empty".into()));
    }
    if !token::is_well_formed(raw) {
        return Err(AppError::Validation(format!(
            "token must be {} letters or digits",
            token::TOKEN_LENGTH
        )));
    }

    let voter = voter_by_token(conn, raw).await?;
    let voting_session = session::current(conn).await?;
    let voter = voter.filter(|v| v.is_verified).ok_or(AppError::InvalidToken)?;
    if voter.has_voted {
        return Err(AppError::AlreadyVoted);
    }
    if !voting_session.is_active {
        return Err(AppError::VotingClosed);
    }
    Ok(voter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SESSION_KEY, test_db};

    fn voter(is_verified: bool, has_voted: bool) -> Voter {
        Voter {
            id: "v1".into(),
            name: "A".into(),
            class_name: "X".into(),
            nisn: "1234567890".into(),
            is_verified,
            vote_token: Some("AB12c".into()),
            has_voted,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn voting_session(is_active: bool) -> VotingSession {
        VotingSession {
            id: SESSION_KEY.into(),
            is_active,
            description: None,
            start_time: None,
            end_time: None,
        }
    }

    fn candidate() -> Candidate {
        Candidate {
            id: "c1".into(),
            name: "Ahmad".into(),
            class_name: "XII RPL 1".into(),
            vision: "A vision statement".into(),
            mission: "A mission statement".into(),
            photo: None,
            order_number: 1,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn admits_verified_voter_while_open() {
        let v = voter(true, false);
        let admitted = admit(Some(&v), Some(&voting_session(true)), Some(&candidate())).unwrap();
        assert_eq!(admitted.id, "v1");
    }

    #[test]
    fn unknown_token_is_invalid() {
        let err = admit(None, Some(&voting_session(true)), Some(&candidate())).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn unverified_voter_token_is_invalid() {
        let v = voter(false, false);
        let err = admit(Some(&v), Some(&voting_session(true)), Some(&candidate())).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn second_ballot_is_already_voted() {
        let v = voter(true, true);
        let err = admit(Some(&v), Some(&voting_session(true)), Some(&candidate())).unwrap_err();
        assert!(matches!(err, AppError::AlreadyVoted));
    }

    #[test]
    fn closed_or_missing_session_rejects() {
        let v = voter(true, false);
        let err = admit(Some(&v), Some(&voting_session(false)), Some(&candidate())).unwrap_err();
        assert!(matches!(err, AppError::VotingClosed));
        let err = admit(Some(&v), None, Some(&candidate())).unwrap_err();
        assert!(matches!(err, AppError::VotingClosed));
    }

    #[test]
    fn unknown_candidate_rejects() {
        let v = voter(true, false);
        let err = admit(Some(&v), Some(&voting_session(true)), None).unwrap_err();
        assert!(matches!(err, AppError::UnknownCandidate));
    }

    #[test]
    fn checks_run_in_order() {
        // Every precondition fails at once: the token check wins.
        let err = admit(None, Some(&voting_session(false)), None).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));

        // Voted voter, closed session, bad candidate: already voted wins.
        let v = voter(true, true);
        let err = admit(Some(&v), Some(&voting_session(false)), None).unwrap_err();
        assert!(matches!(err, AppError::AlreadyVoted));

        // Closed session beats unknown candidate.
        let v = voter(true, false);
        let err = admit(Some(&v), Some(&voting_session(false)), None).unwrap_err();
        assert!(matches!(err, AppError::VotingClosed));
    }

    #[test]
    fn client_meta_prefers_forwarded_address() {
        let meta = ClientMeta::from_headers(
            Some("203.0.113.9, 10.0.0.1"),
            Some("10.0.0.2"),
            Some("127.0.0.1".into()),
            Some("Mozilla/5.0"),
        );
        assert_eq!(meta.ip_address, "203.0.113.9");
        assert_eq!(meta.user_agent, "Mozilla/5.0");
    }

    #[test]
    fn client_meta_falls_back_to_unknown() {
        let meta = ClientMeta::from_headers(None, Some("  "), None, None);
        assert_eq!(meta.ip_address, "unknown");
        assert_eq!(meta.user_agent, "unknown");

        let long_agent = "x".repeat(400);
        let meta = ClientMeta::from_headers(None, None, None, Some(&long_agent));
        assert_eq!(meta.user_agent.len(), MAX_USER_AGENT_LEN);
    }

    fn client() -> ClientMeta {
        ClientMeta::from_headers(None, None, Some("127.0.0.1".into()), Some("test"))
    }

    async fn verified_voter(conn: &mut AsyncMysqlConnection, nisn: &str) -> Voter {
        let voter = test_db::voter(conn, nisn).await;
        crate::voters::verify(conn, &voter.id).await.unwrap()
    }

    #[rocket::async_test]
    async fn second_submit_is_already_voted_and_writes_no_row() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let candidate = test_db::candidate(conn, 1).await;
        let voter = verified_voter(conn, "1234567890").await;
        let token = voter.vote_token.clone().unwrap();
        session::set_active(conn, true).await.unwrap();

        cast(conn, &token, &candidate.id, &client()).await.unwrap();
        assert!(test_db::reload_voter(conn, &voter.id).await.has_voted);
        assert_eq!(test_db::vote_rows(conn).await, 1);

        let err = cast(conn, &token, &candidate.id, &client()).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyVoted));
        assert_eq!(test_db::vote_rows(conn).await, 1);
    }

    #[rocket::async_test]
    async fn concurrent_submits_with_one_token_admit_exactly_one() {
        let Some(mut db) = test_db::open().await else { return };
        let candidate = test_db::candidate(&mut db.conn, 1).await;
        let voter = verified_voter(&mut db.conn, "1234567891").await;
        let token = voter.vote_token.unwrap();
        session::set_active(&mut db.conn, true).await.unwrap();

        let mut conns = Vec::new();
        for _ in 0..6 {
            conns.push(db.connect_another().await);
        }
        let meta = client();
        let attempts = conns
            .iter_mut()
            .map(|conn| cast(conn, &token, &candidate.id, &meta));
        let results = rocket::futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::AlreadyVoted)));
        assert_eq!(test_db::vote_rows(&mut db.conn).await, 1);
    }

    #[rocket::async_test]
    async fn closed_session_rejects_and_writes_nothing() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let candidate = test_db::candidate(conn, 1).await;
        let voter = verified_voter(conn, "1234567892").await;
        let token = voter.vote_token.clone().unwrap();

        let err = cast(conn, &token, &candidate.id, &client()).await.unwrap_err();
        assert!(matches!(err, AppError::VotingClosed));
        assert!(!test_db::reload_voter(conn, &voter.id).await.has_voted);
        assert_eq!(test_db::vote_rows(conn).await, 0);
    }

    #[rocket::async_test]
    async fn validate_needs_verified_unvoted_voter_and_open_session() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let candidate = test_db::candidate(conn, 1).await;
        let voter = verified_voter(conn, "1234567893").await;
        let token = voter.vote_token.clone().unwrap();

        assert!(matches!(validate(conn, &token).await, Err(AppError::VotingClosed)));
        session::set_active(conn, true).await.unwrap();
        assert_eq!(validate(conn, &token).await.unwrap().id, voter.id);
        assert!(matches!(validate(conn, "zzzzz").await, Err(AppError::InvalidToken)));
        assert!(matches!(validate(conn, "abc").await, Err(AppError::Validation(_))));

        cast(conn, &token, &candidate.id, &client()).await.unwrap();
        assert!(matches!(validate(conn, &token).await, Err(AppError::AlreadyVoted)));
    }
}
