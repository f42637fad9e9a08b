// Display settings: a flat key/value map shown by the front-end

use std::collections::BTreeMap;

use diesel_async::AsyncMysqlConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use rocket_db_pools::diesel::prelude::*;

use crate::db::now;
use crate::error::AppError;
use crate::models::{NewSetting, Setting};
use crate::schema::settings;

pub const MAX_KEY_LEN: usize = 50;
pub const MAX_VALUE_LEN: usize = 255;

pub fn validate(entries: &BTreeMap<String, String>) -> Result<(), AppError> {
    if entries.is_empty() {
        return Err(AppError::Validation("no settings given".into()));
    }
    for (key, value) in entries {
        let key_len = key.trim().chars().count();
        if key_len == 0 || key_len > MAX_KEY_LEN {
            return Err(AppError::Validation(format!(
                "setting keys must be 1 to {MAX_KEY_LEN} characters"
            )));
        }
        if value.chars().count() > MAX_VALUE_LEN {
            return Err(AppError::Validation(format!(
                "value of {key} must be at most {MAX_VALUE_LEN} characters"
            )));
        }
    }
    Ok(())
}

pub async fn all(conn: &mut AsyncMysqlConnection) -> Result<BTreeMap<String, String>, AppError> {
    let rows: Vec<Setting> = settings::table
        .select(Setting::as_select())
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(|s| (s.key_name, s.value)).collect())
}

/// Inserts or overwrites every entry in one transaction.
pub async fn upsert(
    conn: &mut AsyncMysqlConnection,
    entries: BTreeMap<String, String>,
) -> Result<usize, AppError> {
    validate(&entries)?;
    let at = now();
    let rows: Vec<NewSetting> = entries
        .into_iter()
        .map(|(key, value)| NewSetting {
            key_name: key.trim().to_string(),
            value,
            updated_at: at,
        })
        .collect();

    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            for row in &rows {
                diesel::replace_into(settings::table)
                    .values(row)
                    .execute(conn)
                    .await?;
            }
            Ok(rows.len())
        }
        .scope_boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn accepts_ordinary_settings() {
        assert!(validate(&map(&[("school_name", "SMK Negeri 1"), ("footer", "")])).is_ok());
    }

    #[test]
    fn rejects_bad_keys_and_long_values() {
        assert!(validate(&BTreeMap::new()).is_err());
        assert!(validate(&map(&[("  ", "x")])).is_err());
        let long_key = "k".repeat(51);
        assert!(validate(&map(&[(long_key.as_str(), "x")])).is_err());
        let too_long = "v".repeat(256);
        assert!(validate(&map(&[("title", too_long.as_str())])).is_err());
        let just_fits = "v".repeat(255);
        assert!(validate(&map(&[("title", just_fits.as_str())])).is_ok());
    }
}
