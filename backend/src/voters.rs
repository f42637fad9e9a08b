// Voter roll: validation, lifecycle transitions and their store operations

use diesel_async::AsyncMysqlConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use rocket_db_pools::diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{is_unique_violation, now};
use crate::error::AppError;
use crate::models::{
    NewVoter, UpdateVoterRequest, VotedFor, Voter, VoterChanges, VoterWithVote,
};
use crate::schema::{candidates, voters, votes};
use crate::session;
use crate::token;

pub const NISN_LENGTH: usize = 10;
const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;
const CLASS_MAX: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterState {
    Unverified,
    Verified,
    Voted,
}

impl VoterState {
    pub fn of(voter: &Voter) -> Self {
        if voter.has_voted {
            VoterState::Voted
        } else if voter.is_verified {
            VoterState::Verified
        } else {
            VoterState::Unverified
        }
    }
}

/// Which slice of the roll a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoterFilter {
    #[default]
    All,
    Unverified,
    Verified,
    Voted,
}

impl VoterFilter {
    pub fn parse(s: Option<&str>) -> Result<Self, AppError> {
        match s.unwrap_or("all") {
            "all" | "" => Ok(VoterFilter::All),
            "unverified" => Ok(VoterFilter::Unverified),
            "verified" => Ok(VoterFilter::Verified),
            "voted" => Ok(VoterFilter::Voted),
            other => Err(AppError::Validation(format!("unknown voter status '{other}'"))),
        }
    }
}

pub fn is_valid_nisn(nisn: &str) -> bool {
    nisn.len() == NISN_LENGTH && nisn.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len < NAME_MIN {
        Err(format!("name must be at least {NAME_MIN} characters"))
    } else if len > NAME_MAX {
        Err(format!("name must be at most {NAME_MAX} characters"))
    } else {
        Ok(())
    }
}

pub fn validate_class(class_name: &str) -> Result<(), String> {
    let len = class_name.chars().count();
    if len == 0 {
        Err("class is required".into())
    } else if len > CLASS_MAX {
        Err(format!("class must be at most {CLASS_MAX} characters"))
    } else {
        Ok(())
    }
}

pub fn validate_nisn(nisn: &str) -> Result<(), String> {
    if is_valid_nisn(nisn) {
        Ok(())
    } else {
        Err(format!("NISN must be exactly {NISN_LENGTH} digits"))
    }
}

/// Trims and validates the fields of a new voter.
pub fn validated_voter(name: &str, class_name: &str, nisn: &str) -> Result<NewVoter, AppError> {
    let (name, class_name, nisn) = (name.trim(), class_name.trim(), nisn.trim());
    validate_name(name)
        .and_then(|_| validate_class(class_name))
        .and_then(|_| validate_nisn(nisn))
        .map_err(AppError::Validation)?;

    let at = now();
    Ok(NewVoter {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        class_name: class_name.to_string(),
        nisn: nisn.to_string(),
        is_verified: false,
        vote_token: None,
        has_voted: false,
        created_at: at,
        updated_at: at,
    })
}

pub fn validated_changes(req: UpdateVoterRequest) -> Result<VoterChanges, AppError> {
    let name = req.name.map(|s| s.trim().to_string());
    let class_name = req.class_name.map(|s| s.trim().to_string());
    let nisn = req.nisn.map(|s| s.trim().to_string());

    let checks = [
        name.as_deref().map(validate_name),
        class_name.as_deref().map(validate_class),
        nisn.as_deref().map(validate_nisn),
    ];
    for check in checks.into_iter().flatten() {
        check.map_err(AppError::Validation)?;
    }

    Ok(VoterChanges {
        name,
        class_name,
        nisn,
        updated_at: Some(now()),
    })
}

fn voter_not_found() -> AppError {
    AppError::NotFound("voter not found".into())
}

pub async fn find(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Voter, AppError> {
    voters::table
        .find(id)
        .select(Voter::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(voter_not_found)
}

async fn lock(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Voter, AppError> {
    voters::table
        .find(id)
        .select(Voter::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(voter_not_found)
}

pub async fn nisn_exists(conn: &mut AsyncMysqlConnection, nisn: &str) -> QueryResult<bool> {
    let count: i64 = voters::table
        .filter(voters::nisn.eq(nisn))
        .count()
        .get_result(conn)
        .await?;
    Ok(count > 0)
}

pub async fn create(conn: &mut AsyncMysqlConnection, voter: NewVoter) -> Result<Voter, AppError> {
    if nisn_exists(conn, &voter.nisn).await? {
        return Err(AppError::Conflict(format!("NISN {} is already registered", voter.nisn)));
    }

    diesel::insert_into(voters::table)
        .values(&voter)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("NISN {} is already registered", voter.nisn))
            } else {
                e.into()
            }
        })?;

    find(conn, &voter.id).await
}

pub async fn update(
    conn: &mut AsyncMysqlConnection,
    id: &str,
    changes: VoterChanges,
) -> Result<Voter, AppError> {
    find(conn, id).await?;
    diesel::update(voters::table.find(id))
        .set(&changes)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("NISN is already registered".into())
            } else {
                e.into()
            }
        })?;
    find(conn, id).await
}

/// Deleting a voter also drops their ballot through the foreign key.
pub async fn delete(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Voter, AppError> {
    let voter = find(conn, id).await?;
    diesel::delete(voters::table.find(id)).execute(conn).await?;
    Ok(voter)
}

pub async fn list(
    conn: &mut AsyncMysqlConnection,
    filter: VoterFilter,
    search: Option<&str>,
) -> Result<Vec<VoterWithVote>, AppError> {
    let mut query = voters::table
        .left_join(votes::table.left_join(candidates::table))
        .select((
            Voter::as_select(),
            candidates::name.nullable(),
            candidates::order_number.nullable(),
        ))
        .order(voters::created_at.desc())
        .into_boxed();

    query = match filter {
        VoterFilter::All => query,
        VoterFilter::Unverified => query.filter(voters::is_verified.eq(false)),
        VoterFilter::Verified => query.filter(voters::is_verified.eq(true)),
        VoterFilter::Voted => query.filter(voters::has_voted.eq(true)),
    };

    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(
            voters::name
                .like(pattern.clone())
                .or(voters::nisn.like(pattern.clone()))
                .or(voters::class_name.like(pattern)),
        );
    }

    let rows = query
        .load::<(Voter, Option<String>, Option<i32>)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(voter, candidate_name, order_number)| VoterWithVote {
            voter,
            voted_for: candidate_name
                .zip(order_number)
                .map(|(candidate_name, order_number)| VotedFor {
                    candidate_name,
                    order_number,
                }),
        })
        .collect())
}

pub async fn all(conn: &mut AsyncMysqlConnection) -> Result<Vec<Voter>, AppError> {
    Ok(voters::table
        .select(Voter::as_select())
        .order((voters::class_name.asc(), voters::name.asc()))
        .load(conn)
        .await?)
}

/// Marks the voter verified under a fresh token. Any earlier token stops resolving.
/// `has_voted` is never touched.
pub async fn verify(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Voter, AppError> {
    for attempt in 1..=token::ISSUE_ATTEMPTS {
        let vote_token = token::generate_vote_token();
        let issued = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let vote_token = vote_token.clone();
                async move {
                    let exists: i64 = voters::table
                        .find(id)
                        .count()
                        .get_result(conn)
                        .await?;
                    if exists == 0 {
                        return Ok(false);
                    }
                    diesel::update(voters::table.find(id))
                        .set((
                            voters::is_verified.eq(true),
                            voters::vote_token.eq(Some(vote_token)),
                            voters::updated_at.eq(now()),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(true)
                }
                .scope_boxed()
            })
            .await;

        match issued {
            Ok(true) => {
                info!(voter_id = %id, "Voter verified");
                return find(conn, id).await;
            }
            Ok(false) => return Err(voter_not_found()),
            Err(e) if is_unique_violation(&e) => {
                warn!(attempt, "Vote token collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::TokenCollision)
}

/// `Verified -> Unverified`. A voter who already voted keeps their state; their
/// ballot has to be reset first.
pub async fn reset_verification(
    conn: &mut AsyncMysqlConnection,
    id: &str,
) -> Result<Voter, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let voter = lock(conn, id).await?;
            if VoterState::of(&voter) == VoterState::Voted {
                return Err(AppError::Conflict(format!(
                    "{} has already voted; reset the vote first",
                    voter.name
                )));
            }
            diesel::update(voters::table.find(id))
                .set((
                    voters::is_verified.eq(false),
                    voters::vote_token.eq(None::<String>),
                    voters::updated_at.eq(now()),
                ))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    find(conn, id).await
}

/// Un-verifies every voter who has not voted. Returns how many were reset.
pub async fn reset_all_verifications(conn: &mut AsyncMysqlConnection) -> Result<usize, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            session::lock_exclusive(conn).await?;
            Ok(diesel::update(
                voters::table
                    .filter(voters::has_voted.eq(false))
                    .filter(voters::is_verified.eq(true)),
            )
            .set((
                voters::is_verified.eq(false),
                voters::vote_token.eq(None::<String>),
                voters::updated_at.eq(now()),
            ))
            .execute(conn)
            .await?)
        }
        .scope_boxed()
    })
    .await
}

/// `Voted -> Verified`: the ballot is deleted and the token kept.
pub async fn reset_vote(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Voter, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let voter = lock(conn, id).await?;
            if VoterState::of(&voter) != VoterState::Voted {
                return Err(AppError::Conflict(format!("{} has not voted yet", voter.name)));
            }
            diesel::delete(votes::table.filter(votes::voter_id.eq(id)))
                .execute(conn)
                .await?;
            diesel::update(voters::table.find(id))
                .set((voters::has_voted.eq(false), voters::updated_at.eq(now())))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    find(conn, id).await
}

/// Deletes every ballot and clears every `has_voted` flag in one transaction.
pub async fn reset_all_votes(conn: &mut AsyncMysqlConnection) -> Result<usize, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            session::lock_exclusive(conn).await?;
            let deleted = diesel::delete(votes::table).execute(conn).await?;
            diesel::update(voters::table.filter(voters::has_voted.eq(true)))
                .set((voters::has_voted.eq(false), voters::updated_at.eq(now())))
                .execute(conn)
                .await?;
            Ok(deleted)
        }
        .scope_boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::{ClientMeta, voter_by_token};
    use crate::db::test_db;

    fn voter(is_verified: bool, has_voted: bool) -> Voter {
        Voter {
            id: "v1".into(),
            name: "A".into(),
            class_name: "X".into(),
            nisn: "1234567890".into(),
            is_verified,
            vote_token: is_verified.then(|| "AB12c".to_string()),
            has_voted,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn state_follows_flags() {
        assert_eq!(VoterState::of(&voter(false, false)), VoterState::Unverified);
        assert_eq!(VoterState::of(&voter(true, false)), VoterState::Verified);
        assert_eq!(VoterState::of(&voter(true, true)), VoterState::Voted);
    }

    #[test]
    fn nisn_must_be_ten_digits() {
        assert!(is_valid_nisn("1234567890"));
        assert!(!is_valid_nisn("123456789"));
        assert!(!is_valid_nisn("12345678901"));
        assert!(!is_valid_nisn("12345abcde"));
        assert!(!is_valid_nisn("１２３４５６７８９０"));
    }

    #[test]
    fn new_voter_is_trimmed_and_unverified() {
        let v = validated_voter("  Ahmad Nugroho ", " XII RPL 1", "1234567890 ").unwrap();
        assert_eq!(v.name, "Ahmad Nugroho");
        assert_eq!(v.class_name, "XII RPL 1");
        assert_eq!(v.nisn, "1234567890");
        assert!(!v.is_verified);
        assert!(!v.has_voted);
        assert!(v.vote_token.is_none());
    }

    #[test]
    fn new_voter_rejects_bad_fields() {
        assert!(matches!(
            validated_voter("A", "X", "1234567890"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validated_voter("Ahmad", "   ", "1234567890"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validated_voter("Ahmad", "X", "12345"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validated_voter(&"n".repeat(101), "X", "1234567890"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn partial_update_validates_only_given_fields() {
        let changes = validated_changes(UpdateVoterRequest {
            name: Some(" Siti ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(changes.name.as_deref(), Some("Siti"));
        assert!(changes.class_name.is_none());
        assert!(changes.nisn.is_none());
        assert!(changes.updated_at.is_some());

        assert!(validated_changes(UpdateVoterRequest {
            nisn: Some("abc".into()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn filter_parsing() {
        assert_eq!(VoterFilter::parse(None).unwrap(), VoterFilter::All);
        assert_eq!(
            VoterFilter::parse(Some("unverified")).unwrap(),
            VoterFilter::Unverified
        );
        assert_eq!(VoterFilter::parse(Some("voted")).unwrap(), VoterFilter::Voted);
        assert!(VoterFilter::parse(Some("banned")).is_err());
    }

    #[rocket::async_test]
    async fn reverifying_issues_a_fresh_token_and_retires_the_old_one() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let voter = test_db::voter(conn, "1234567890").await;

        let first = verify(conn, &voter.id).await.unwrap();
        let old_token = first.vote_token.clone().unwrap();
        assert!(first.is_verified);
        assert!(!first.has_voted);

        let second = verify(conn, &voter.id).await.unwrap();
        let new_token = second.vote_token.clone().unwrap();
        assert_ne!(old_token, new_token);
        assert!(!second.has_voted);

        assert!(voter_by_token(conn, &old_token).await.unwrap().is_none());
        assert_eq!(
            voter_by_token(conn, &new_token).await.unwrap().map(|v| v.id),
            Some(voter.id)
        );
    }

    #[rocket::async_test]
    async fn verifying_an_unknown_voter_is_not_found() {
        let Some(mut db) = test_db::open().await else { return };
        let err = verify(&mut db.conn, "no-such-voter").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[rocket::async_test]
    async fn vote_reset_keeps_the_token_and_verification() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let candidate = test_db::candidate(conn, 1).await;
        let voter = test_db::voter(conn, "1234567891").await;
        let token = verify(conn, &voter.id).await.unwrap().vote_token.unwrap();
        session::set_active(conn, true).await.unwrap();
        let client = ClientMeta::from_headers(None, None, None, None);
        crate::ballot::cast(conn, &token, &candidate.id, &client).await.unwrap();

        assert!(matches!(
            reset_verification(conn, &voter.id).await,
            Err(AppError::Conflict(_))
        ));

        let reset = reset_vote(conn, &voter.id).await.unwrap();
        assert!(!reset.has_voted);
        assert!(reset.is_verified);
        assert_eq!(reset.vote_token.as_deref(), Some(token.as_str()));
        assert_eq!(test_db::vote_rows(conn).await, 0);
    }
}
