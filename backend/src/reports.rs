// Read-only tallies for the dashboard, the statistics page and the public monitor

use chrono::{Duration, NaiveDateTime, Timelike};
use diesel::dsl::count;
use diesel_async::AsyncMysqlConnection;
use rocket::serde::Serialize;
use rocket_db_pools::diesel::prelude::*;

use crate::db::now;
use crate::error::AppError;
use crate::schema::{candidates, voters, votes};
use crate::session;

pub const RECENT_VOTES: i64 = 10;
pub const HISTOGRAM_HOURS: usize = 24;

#[derive(Debug, Clone, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct CandidateTally {
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub order_number: i32,
    pub vote_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct Dashboard {
    pub total_voters: i64,
    pub verified_voters: i64,
    pub unverified_voters: i64,
    pub total_votes: i64,
    pub candidates: Vec<CandidateTally>,
    pub is_voting_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VotingStats {
    pub total_voters: i64,
    pub total_voted: i64,
    pub total_not_voted: i64,
    pub votes_by_candidate: Vec<CandidateTally>,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct CandidateShare {
    #[serde(flatten)]
    pub tally: CandidateTally,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct RecentVote {
    pub id: String,
    pub candidate_name: String,
    pub voter_class: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct HourlyBucket {
    pub hour: String,
    pub votes: u32,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct Realtime {
    pub total_voters: i64,
    pub verified_voters: i64,
    pub total_votes: i64,
    pub participation_rate: f64,
    pub candidates: Vec<CandidateShare>,
    pub recent_votes: Vec<RecentVote>,
    pub hourly_data: Vec<HourlyBucket>,
}

/// Ballots cast as a percentage of verified voters.
pub fn participation_rate(total_votes: i64, verified_voters: i64) -> f64 {
    if verified_voters <= 0 {
        return 0.0;
    }
    total_votes as f64 / verified_voters as f64 * 100.0
}

pub fn share(votes: i64, total_votes: i64) -> f64 {
    if total_votes <= 0 {
        return 0.0;
    }
    votes as f64 / total_votes as f64 * 100.0
}

fn floor_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), 0, 0).unwrap_or(t)
}

/// Buckets vote times into the 24 clock hours ending with the current one,
/// oldest first. Votes outside that window are ignored.
pub fn hourly_histogram(now: NaiveDateTime, cast_at: &[NaiveDateTime]) -> Vec<HourlyBucket> {
    let current = floor_to_hour(now);
    let last = HISTOGRAM_HOURS - 1;

    let mut buckets: Vec<HourlyBucket> = (0..HISTOGRAM_HOURS)
        .map(|i| HourlyBucket {
            hour: (current - Duration::hours((last - i) as i64))
                .format("%H:00")
                .to_string(),
            votes: 0,
        })
        .collect();

    for t in cast_at {
        let ago = (current - floor_to_hour(*t)).num_hours();
        if (0..HISTOGRAM_HOURS as i64).contains(&ago) {
            buckets[last - ago as usize].votes += 1;
        }
    }
    buckets
}

async fn tallies(conn: &mut AsyncMysqlConnection) -> Result<Vec<CandidateTally>, AppError> {
    let rows = candidates::table
        .left_join(votes::table)
        .group_by(candidates::id)
        .select((
            candidates::id,
            candidates::name,
            candidates::class_name,
            candidates::order_number,
            count(votes::id.nullable()),
        ))
        .order(candidates::order_number.asc())
        .load::<(String, String, String, i32, i64)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, class_name, order_number, vote_count)| CandidateTally {
            id,
            name,
            class_name,
            order_number,
            vote_count,
        })
        .collect())
}

async fn voter_count(conn: &mut AsyncMysqlConnection) -> QueryResult<i64> {
    voters::table.count().get_result(conn).await
}

async fn verified_count(conn: &mut AsyncMysqlConnection) -> QueryResult<i64> {
    voters::table
        .filter(voters::is_verified.eq(true))
        .count()
        .get_result(conn)
        .await
}

async fn vote_count(conn: &mut AsyncMysqlConnection) -> QueryResult<i64> {
    votes::table.count().get_result(conn).await
}

pub async fn dashboard(conn: &mut AsyncMysqlConnection) -> Result<Dashboard, AppError> {
    let total_voters = voter_count(conn).await?;
    let verified_voters = verified_count(conn).await?;
    let total_votes = vote_count(conn).await?;
    let candidates = tallies(conn).await?;
    let is_voting_active = session::current(conn).await?.is_active;

    Ok(Dashboard {
        total_voters,
        verified_voters,
        unverified_voters: total_voters - verified_voters,
        total_votes,
        candidates,
        is_voting_active,
    })
}

pub async fn voting_stats(conn: &mut AsyncMysqlConnection) -> Result<VotingStats, AppError> {
    let total_voters = voter_count(conn).await?;
    let total_voted: i64 = voters::table
        .filter(voters::has_voted.eq(true))
        .count()
        .get_result(conn)
        .await?;

    Ok(VotingStats {
        total_voters,
        total_voted,
        total_not_voted: total_voters - total_voted,
        votes_by_candidate: tallies(conn).await?,
    })
}

pub async fn realtime(conn: &mut AsyncMysqlConnection) -> Result<Realtime, AppError> {
    let total_voters = voter_count(conn).await?;
    let verified_voters = verified_count(conn).await?;
    let total_votes = vote_count(conn).await?;

    let candidates = tallies(conn)
        .await?
        .into_iter()
        .map(|tally| CandidateShare {
            percentage: share(tally.vote_count, total_votes),
            tally,
        })
        .collect();

    let recent_votes = votes::table
        .inner_join(candidates::table)
        .inner_join(voters::table)
        .select((
            votes::id,
            candidates::name,
            voters::class_name,
            votes::created_at,
        ))
        .order(votes::created_at.desc())
        .limit(RECENT_VOTES)
        .load::<(String, String, String, NaiveDateTime)>(conn)
        .await?
        .into_iter()
        .map(|(id, candidate_name, voter_class, at)| RecentVote {
            id,
            candidate_name,
            voter_class,
            timestamp: at.and_utc().to_rfc3339(),
        })
        .collect();

    let at = now();
    let window_start = floor_to_hour(at) - Duration::hours(HISTOGRAM_HOURS as i64 - 1);
    let cast_at: Vec<NaiveDateTime> = votes::table
        .filter(votes::created_at.ge(window_start))
        .select(votes::created_at)
        .load(conn)
        .await?;

    Ok(Realtime {
        total_voters,
        verified_voters,
        total_votes,
        participation_rate: participation_rate(total_votes, verified_voters),
        candidates,
        recent_votes,
        hourly_data: hourly_histogram(at, &cast_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn participation_is_relative_to_verified_voters() {
        assert_eq!(participation_rate(0, 0), 0.0);
        assert_eq!(participation_rate(5, 0), 0.0);
        assert_eq!(participation_rate(25, 100), 25.0);
        assert_eq!(participation_rate(3, 4), 75.0);
    }

    #[test]
    fn shares_handle_empty_ballot_box() {
        assert_eq!(share(0, 0), 0.0);
        assert_eq!(share(1, 4), 25.0);
    }

    #[test]
    fn histogram_has_24_hours_ending_now() {
        let buckets = hourly_histogram(at(2, 9, 41), &[]);
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0].hour, "10:00");
        assert_eq!(buckets[23].hour, "09:00");
        assert!(buckets.iter().all(|b| b.votes == 0));
    }

    #[test]
    fn histogram_counts_votes_in_their_hour() {
        let now = at(2, 9, 41);
        let votes = [
            at(2, 9, 0),
            at(2, 9, 40),
            at(2, 8, 59),
            at(1, 10, 5),
            // Outside the window.
            at(1, 9, 59),
            at(2, 10, 0),
        ];
        let buckets = hourly_histogram(now, &votes);
        assert_eq!(buckets[23].votes, 2);
        assert_eq!(buckets[22].votes, 1);
        assert_eq!(buckets[22].hour, "08:00");
        assert_eq!(buckets[0].votes, 1);
        assert_eq!(buckets.iter().map(|b| b.votes).sum::<u32>(), 4);
    }
}
