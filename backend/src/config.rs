use rocket::figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

const ENV_KEYS: &[&str] = &[
    "DATABASE_URL",
    "STATIC_DIR",
    "UPLOADS_DIR",
    "SESSION_TTL_HOURS",
    "MAX_CANDIDATES",
    "ADMIN_USERNAME",
    "ADMIN_PASSWORD_HASH",
    "COMMITTEE_USERNAME",
    "COMMITTEE_PASSWORD_HASH",
    "CANDIDATES",
    "ELECTION_DESCRIPTION",
];

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(alias = "DATABASE_URL")]
    pub database_url: String,
    #[serde(default = "default_static_dir", alias = "STATIC_DIR")]
    pub static_dir: String,
    #[serde(default = "default_uploads_dir", alias = "UPLOADS_DIR")]
    pub uploads_dir: String,
    #[serde(default = "default_session_ttl_hours", alias = "SESSION_TTL_HOURS")]
    pub session_ttl_hours: i64,
    /// Highest ordinal a candidate may take.
    #[serde(default = "default_max_candidates", alias = "MAX_CANDIDATES")]
    pub max_candidates: i32,
    #[serde(default, alias = "ADMIN_USERNAME")]
    pub admin_username: Option<String>,
    #[serde(default, alias = "ADMIN_PASSWORD_HASH")]
    pub admin_password_hash: Option<String>,
    #[serde(default, alias = "COMMITTEE_USERNAME")]
    pub committee_username: Option<String>,
    #[serde(default, alias = "COMMITTEE_PASSWORD_HASH")]
    pub committee_password_hash: Option<String>,
    /// Comma separated candidate names seeded into an empty table.
    #[serde(default, alias = "CANDIDATES")]
    pub candidates: Option<String>,
    #[serde(default = "default_election_description", alias = "ELECTION_DESCRIPTION")]
    pub election_description: String,
}

fn default_static_dir() -> String {
    "/app/static".into()
}

fn default_uploads_dir() -> String {
    "/app/uploads".into()
}

fn default_session_ttl_hours() -> i64 {
    12
}

fn default_max_candidates() -> i32 {
    3
}

fn default_election_description() -> String {
    "Student council election".into()
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file("Config.toml"))
            .merge(Toml::file("../Config.toml"))
            .merge(Env::raw().only(ENV_KEYS))
    }

    pub fn load() -> Result<Self, rocket::figment::Error> {
        Self::figment().extract()
    }

    /// Seed accounts are only created when both the username and the hash are set.
    pub fn seed_admin(&self) -> Option<(&str, &str)> {
        Some((
            self.admin_username.as_deref()?,
            self.admin_password_hash.as_deref()?,
        ))
    }

    pub fn seed_committee(&self) -> Option<(&str, &str)> {
        Some((
            self.committee_username.as_deref()?,
            self.committee_password_hash.as_deref()?,
        ))
    }

    pub fn seed_candidate_names(&self) -> Vec<String> {
        self.candidates
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}
