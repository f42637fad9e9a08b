// Voting-session singleton: the global gate on ballot submission

use chrono::NaiveDateTime;
use diesel_async::AsyncMysqlConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use rocket_db_pools::diesel::prelude::*;
use tracing::info;

use crate::db::{SESSION_KEY, now};
use crate::error::AppError;
use crate::models::VotingSession;
use crate::schema::{voters, votes, voting_sessions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSummary {
    pub votes_deleted: usize,
    pub voters_reset: usize,
}

/// Applies an activate/deactivate transition. Returns false when the session is
/// already in the requested state, in which case nothing is stamped.
pub fn apply_transition(session: &mut VotingSession, active: bool, at: NaiveDateTime) -> bool {
    if session.is_active == active {
        return false;
    }
    session.is_active = active;
    if active {
        session.start_time = Some(at);
        session.end_time = None;
    } else {
        session.end_time = Some(at);
    }
    true
}

fn missing_session() -> AppError {
    AppError::Internal("voting session row is missing".into())
}

pub async fn current(conn: &mut AsyncMysqlConnection) -> Result<VotingSession, AppError> {
    voting_sessions::table
        .find(SESSION_KEY)
        .select(VotingSession::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(missing_session)
}

/// Exclusive lock on the session row. Every multi-voter write takes this first so
/// that it serializes against in-flight ballots, which hold it in share mode.
pub(crate) async fn lock_exclusive(
    conn: &mut AsyncMysqlConnection,
) -> Result<VotingSession, AppError> {
    voting_sessions::table
        .find(SESSION_KEY)
        .select(VotingSession::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(missing_session)
}

pub(crate) async fn lock_shared(
    conn: &mut AsyncMysqlConnection,
) -> Result<Option<VotingSession>, AppError> {
    Ok(voting_sessions::table
        .find(SESSION_KEY)
        .select(VotingSession::as_select())
        .for_share()
        .first(conn)
        .await
        .optional()?)
}

pub async fn set_active(
    conn: &mut AsyncMysqlConnection,
    active: bool,
) -> Result<VotingSession, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let mut session = lock_exclusive(conn).await?;
            if apply_transition(&mut session, active, now()) {
                diesel::update(voting_sessions::table.find(SESSION_KEY))
                    .set((
                        voting_sessions::is_active.eq(session.is_active),
                        voting_sessions::start_time.eq(session.start_time),
                        voting_sessions::end_time.eq(session.end_time),
                    ))
                    .execute(conn)
                    .await?;
            }
            Ok(session)
        }
        .scope_boxed()
    })
    .await
}

/// Wipes every ballot, un-verifies every voter and closes the session, atomically.
/// Refused while the session is active.
pub async fn reset_voting_data(conn: &mut AsyncMysqlConnection) -> Result<ResetSummary, AppError> {
    let summary = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let session = lock_exclusive(conn).await?;
                if session.is_active {
                    return Err(AppError::SessionActive);
                }

                let at = now();
                let votes_deleted = diesel::delete(votes::table).execute(conn).await?;
                let voters_reset = diesel::update(voters::table)
                    .set((
                        voters::has_voted.eq(false),
                        voters::is_verified.eq(false),
                        voters::vote_token.eq(None::<String>),
                        voters::updated_at.eq(at),
                    ))
                    .execute(conn)
                    .await?;
                diesel::update(voting_sessions::table.find(SESSION_KEY))
                    .set((
                        voting_sessions::is_active.eq(false),
                        voting_sessions::end_time.eq(Some(at)),
                    ))
                    .execute(conn)
                    .await?;

                Ok(ResetSummary {
                    votes_deleted,
                    voters_reset,
                })
            }
            .scope_boxed()
        })
        .await?;

    info!(
        votes_deleted = summary.votes_deleted,
        voters_reset = summary.voters_reset,
        "Voting data reset"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::ClientMeta;
    use crate::db::test_db;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn inactive() -> VotingSession {
        VotingSession {
            id: SESSION_KEY.into(),
            is_active: false,
            description: None,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn activating_stamps_start_and_clears_end() {
        let mut session = inactive();
        session.end_time = Some(at(6));
        assert!(apply_transition(&mut session, true, at(7)));
        assert!(session.is_active);
        assert_eq!(session.start_time, Some(at(7)));
        assert_eq!(session.end_time, None);
    }

    #[test]
    fn deactivating_stamps_end_and_keeps_start() {
        let mut session = inactive();
        apply_transition(&mut session, true, at(7));
        assert!(apply_transition(&mut session, false, at(12)));
        assert!(!session.is_active);
        assert_eq!(session.start_time, Some(at(7)));
        assert_eq!(session.end_time, Some(at(12)));
    }

    #[test]
    fn repeating_the_current_state_is_a_no_op() {
        let mut session = inactive();
        apply_transition(&mut session, true, at(7));
        assert!(!apply_transition(&mut session, true, at(9)));
        assert_eq!(session.start_time, Some(at(7)));

        let mut closed = inactive();
        assert!(!apply_transition(&mut closed, false, at(9)));
        assert_eq!(closed.end_time, None);
    }

    async fn voted_election(db: &mut test_db::TestDb) -> (String, String) {
        let conn = &mut db.conn;
        let candidate = test_db::candidate(conn, 1).await;
        let voted = test_db::voter(conn, "1234567890").await;
        let waiting = test_db::voter(conn, "1234567891").await;
        let token = crate::voters::verify(conn, &voted.id).await.unwrap().vote_token.unwrap();
        crate::voters::verify(conn, &waiting.id).await.unwrap();
        set_active(conn, true).await.unwrap();
        let client = ClientMeta::from_headers(None, None, None, None);
        crate::ballot::cast(conn, &token, &candidate.id, &client).await.unwrap();
        (voted.id, waiting.id)
    }

    #[rocket::async_test]
    async fn reset_is_refused_while_voting_is_open() {
        let Some(mut db) = test_db::open().await else { return };
        let (voted, _) = voted_election(&mut db).await;
        let conn = &mut db.conn;

        let err = reset_voting_data(conn).await.unwrap_err();
        assert!(matches!(err, AppError::SessionActive));
        assert_eq!(test_db::vote_rows(conn).await, 1);
        assert!(test_db::reload_voter(conn, &voted).await.has_voted);
    }

    #[rocket::async_test]
    async fn closing_the_session_keeps_votes_and_flags() {
        let Some(mut db) = test_db::open().await else { return };
        let (voted, waiting) = voted_election(&mut db).await;
        let conn = &mut db.conn;

        let closed = set_active(conn, false).await.unwrap();
        assert!(!closed.is_active);
        assert!(closed.end_time.is_some());

        assert_eq!(test_db::vote_rows(conn).await, 1);
        let voted = test_db::reload_voter(conn, &voted).await;
        assert!(voted.has_voted && voted.is_verified);
        let waiting = test_db::reload_voter(conn, &waiting).await;
        assert!(!waiting.has_voted && waiting.is_verified);
    }

    #[rocket::async_test]
    async fn reset_after_closing_wipes_everything_at_once() {
        let Some(mut db) = test_db::open().await else { return };
        let (voted, waiting) = voted_election(&mut db).await;
        let conn = &mut db.conn;
        set_active(conn, false).await.unwrap();

        let summary = reset_voting_data(conn).await.unwrap();
        assert_eq!(summary.votes_deleted, 1);
        assert_eq!(test_db::vote_rows(conn).await, 0);
        for id in [voted, waiting] {
            let voter = test_db::reload_voter(conn, &id).await;
            assert!(!voter.has_voted && !voter.is_verified);
            assert_eq!(voter.vote_token, None);
        }
        assert!(!current(conn).await.unwrap().is_active);
    }
}
