// Database connection, migrations and seeding

use chrono::{NaiveDateTime, Timelike, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use rocket::Rocket;
use rocket_db_pools::Database;
use rocket_db_pools::diesel::MysqlPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::Role;
use crate::config::AppConfig;
use crate::models::{NewCandidate, NewOperator, NewVotingSession};

/// Database connection pool for the election
#[derive(Database)]
#[database("voting_db")]
pub struct VotingDB(MysqlPool);

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Key of the single voting-session row.
pub const SESSION_KEY: &str = "default";

/// Current UTC time at the precision a DATETIME column keeps.
pub fn now() -> NaiveDateTime {
    let at = Utc::now().naive_utc();
    at.with_nanosecond(0).unwrap_or(at)
}

pub fn is_unique_violation(e: &DieselError) -> bool {
    matches!(
        e,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

fn database_url(rocket: &Rocket<rocket::Build>) -> Option<String> {
    rocket
        .state::<AppConfig>()
        .map(|config| config.database_url.clone())
}

/// Run pending database migrations
pub async fn run_migrations(rocket: Rocket<rocket::Build>) -> Rocket<rocket::Build> {
    let Some(database_url) = database_url(&rocket) else {
        error!("Application config is not managed; cannot run migrations");
        panic!("Database migration failed");
    };

    // MigrationHarness needs a synchronous connection
    let result = rocket::tokio::task::spawn_blocking(move || {
        let mut sync_conn = MysqlConnection::establish(&database_url)
            .map_err(|e| format!("Failed to establish connection: {}", e))?;

        let versions = sync_conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| format!("Failed to run migrations: {}", e))?
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>();

        Ok::<_, String>(versions)
    })
    .await;

    match result {
        Ok(Ok(versions)) if versions.is_empty() => info!("Database is up to date"),
        Ok(Ok(versions)) => {
            info!("Applied {} migration(s)", versions.len());
            for version in versions {
                info!(%version, "migration applied");
            }
        }
        Ok(Err(e)) => {
            error!("{}", e);
            panic!("Database migration failed");
        }
        Err(e) => {
            error!("Migration task panicked: {}", e);
            panic!("Database migration failed");
        }
    }

    rocket
}

/// Seed operator accounts, the voting-session row and candidates
pub async fn run_seeding(rocket: Rocket<rocket::Build>) -> Rocket<rocket::Build> {
    let Some(config) = rocket.state::<AppConfig>().cloned() else {
        error!("Application config is not managed; skipping seeding");
        return rocket;
    };

    let result = rocket::tokio::task::spawn_blocking(move || {
        let mut sync_conn = MysqlConnection::establish(&config.database_url)
            .map_err(|e| format!("Failed to establish connection: {}", e))?;
        seed(&mut sync_conn, &config).map_err(|e| format!("Failed to seed: {}", e))
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Seeding failed: {}", e),
        Err(e) => error!("Seeding task panicked: {}", e),
    }

    rocket
}

fn seed(conn: &mut MysqlConnection, config: &AppConfig) -> QueryResult<()> {
    use crate::schema::{candidates, operators, voting_sessions};

    let at = now();

    let accounts = [
        (config.seed_admin(), Role::Admin, "Administrator"),
        (config.seed_committee(), Role::Committee, "Verification Committee"),
    ];
    for (account, role, display_name) in accounts {
        let Some((username, password_hash)) = account else {
            continue;
        };
        let exists: i64 = operators::table
            .filter(operators::username.eq(username))
            .count()
            .get_result(conn)?;
        if exists == 0 {
            diesel::insert_into(operators::table)
                .values(&NewOperator {
                    id: Uuid::new_v4().to_string(),
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    name: display_name.to_string(),
                    role: role.as_str().to_string(),
                    is_active: true,
                    created_at: at,
                })
                .execute(conn)?;
            info!(%username, role = role.as_str(), "Seeded operator account");
        }
    }

    diesel::insert_or_ignore_into(voting_sessions::table)
        .values(&NewVotingSession {
            id: SESSION_KEY.to_string(),
            is_active: false,
            description: Some(config.election_description.clone()),
        })
        .execute(conn)?;
    diesel::update(
        voting_sessions::table
            .find(SESSION_KEY)
            .filter(voting_sessions::description.is_null()),
    )
    .set(voting_sessions::description.eq(&config.election_description))
    .execute(conn)?;

    let names = config.seed_candidate_names();
    if !names.is_empty() {
        let count: i64 = candidates::table.count().get_result(conn)?;
        if count == 0 {
            let new_candidates: Vec<NewCandidate> = names
                .into_iter()
                .enumerate()
                .map(|(i, name)| NewCandidate {
                    id: Uuid::new_v4().to_string(),
                    name,
                    class_name: String::new(),
                    vision: String::new(),
                    mission: String::new(),
                    photo: None,
                    order_number: i as i32 + 1,
                    created_at: at,
                    updated_at: at,
                })
                .collect();

            diesel::insert_into(candidates::table)
                .values(&new_candidates)
                .execute(conn)?;
            info!("Seeded {} candidates from configuration", new_candidates.len());
        }
    }

    Ok(())
}
