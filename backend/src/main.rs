// Main application entry point

#[macro_use]
extern crate rocket;

mod auth;
mod ballot;
mod candidates;
mod config;
mod db;
mod error;
mod models;
mod operators;
mod reports;
mod roster;
mod routes;
mod schema;
mod session;
mod settings;
mod token;
mod voters;

use rocket::fairing::AdHoc;
use rocket::fs::{FileServer, Options};
use rocket_db_pools::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use db::VotingDB;
use routes::{auth as auth_routes, candidates as candidate_routes, operators as operator_routes};
use routes::{reports as report_routes, settings as settings_routes, voters as voter_routes};
use routes::voting::{admin as voting_admin, client as voting_client};

#[launch]
fn rocket() -> _ {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = AppConfig::load().unwrap_or_else(|e| panic!("invalid configuration: {e}"));

    if let Err(e) = std::fs::create_dir_all(&config.uploads_dir) {
        panic!("cannot create uploads directory {}: {e}", config.uploads_dir);
    }

    let figment = rocket::config::Config::figment().merge((
        "databases.voting_db",
        rocket_db_pools::Config {
            url: config.database_url.clone(),
            min_connections: None,
            max_connections: 1024,
            connect_timeout: 3,
            idle_timeout: None,
            extensions: None,
        },
    ));

    info!(static_dir = %config.static_dir, uploads_dir = %config.uploads_dir, "Starting election server");

    let static_dir = config.static_dir.clone();
    let uploads_dir = config.uploads_dir.clone();

    rocket::custom(figment)
        .manage(config)
        .attach(VotingDB::init())
        .attach(AdHoc::on_ignite("Database Migrations", db::run_migrations))
        .attach(AdHoc::on_ignite("Database Seeding", db::run_seeding))
        .mount(
            "/api",
            routes![
                auth_routes::login,
                auth_routes::logout,
                auth_routes::me,
                voter_routes::list_voters,
                voter_routes::create_voter,
                voter_routes::update_voter,
                voter_routes::delete_voter,
                voter_routes::import_voters,
                voter_routes::export_voters_csv,
                voter_routes::export_voters_xlsx,
                voter_routes::import_template,
                voter_routes::verify_voter,
                voter_routes::reset_verification,
                voter_routes::reset_all_verifications,
                voting_admin::get_voting_session,
                voting_admin::set_voting_session,
                voting_admin::reset_voting,
                voting_admin::reset_all_votes,
                voting_admin::reset_vote,
                voting_client::ballot_page,
                voting_client::submit_vote,
                voting_client::vote_status,
                voting_client::validate_token,
                candidate_routes::list_candidates,
                candidate_routes::create_candidate,
                candidate_routes::update_candidate,
                candidate_routes::delete_candidate,
                report_routes::dashboard,
                report_routes::voting_stats,
                report_routes::realtime,
                settings_routes::get_settings,
                settings_routes::save_settings,
                operator_routes::list_committee,
                operator_routes::create_committee,
                operator_routes::set_committee_active,
            ],
        )
        .mount(
            candidates::PHOTO_ROUTE,
            FileServer::new(uploads_dir, Options::Missing).rank(5),
        )
        .mount("/", FileServer::new(static_dir, Options::Index | Options::Missing))
        .register(
            "/",
            catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::forbidden,
                routes::not_found,
                routes::unprocessable,
                routes::internal_error,
                routes::unavailable,
            ],
        )
}
