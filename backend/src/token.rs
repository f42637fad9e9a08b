use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};

/// Voting tokens are exactly this many characters of `[A-Za-z0-9]`.
pub const TOKEN_LENGTH: usize = 5;

/// How many fresh tokens are tried before a collision is reported.
pub const ISSUE_ATTEMPTS: usize = 8;

pub fn generate_vote_token() -> String {
    generate_with(&mut thread_rng())
}

pub fn generate_with<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Shape check only; says nothing about whether the token was ever issued.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}
