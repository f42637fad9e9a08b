// Candidates: validation, photo storage and store operations

use std::path::{Path, PathBuf};

use chrono::Utc;
use diesel_async::AsyncMysqlConnection;
use rocket::fs::TempFile;
use rocket_db_pools::diesel::prelude::*;
use tracing::warn;
use uuid::Uuid;

use crate::db::{is_unique_violation, now};
use crate::error::AppError;
use crate::models::{Candidate, CandidateChanges, NewCandidate};
use crate::schema::{candidates, votes};

/// URL prefix under which uploaded photos are served.
pub const PHOTO_ROUTE: &str = "/uploads";

/// Multipart body of the create and update endpoints.
#[derive(FromForm)]
pub struct CandidateForm<'r> {
    pub name: String,
    #[field(name = "class")]
    pub class_name: String,
    pub vision: String,
    pub mission: String,
    #[field(name = "orderNumber")]
    pub order_number: i32,
    pub photo: Option<TempFile<'r>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFields {
    pub name: String,
    pub class_name: String,
    pub vision: String,
    pub mission: String,
    pub order_number: i32,
}

impl CandidateFields {
    pub fn validate(
        name: &str,
        class_name: &str,
        vision: &str,
        mission: &str,
        order_number: i32,
        max_candidates: i32,
    ) -> Result<Self, AppError> {
        let fields = CandidateFields {
            name: name.trim().to_string(),
            class_name: class_name.trim().to_string(),
            vision: vision.trim().to_string(),
            mission: mission.trim().to_string(),
            order_number,
        };

        let problem = if fields.name.chars().count() < 2 {
            Some("name must be at least 2 characters".to_string())
        } else if fields.name.chars().count() > 100 {
            Some("name must be at most 100 characters".to_string())
        } else if fields.class_name.is_empty() || fields.class_name.chars().count() > 50 {
            Some("class is required (at most 50 characters)".to_string())
        } else if fields.vision.chars().count() < 10 {
            Some("vision must be at least 10 characters".to_string())
        } else if fields.mission.chars().count() < 10 {
            Some("mission must be at least 10 characters".to_string())
        } else if !(1..=max_candidates).contains(&order_number) {
            Some(format!("order number must be between 1 and {max_candidates}"))
        } else {
            None
        };

        match problem {
            Some(message) => Err(AppError::Validation(message)),
            None => Ok(fields),
        }
    }
}

/// File name for an uploaded photo: `<millis>-<stem>.<ext>`.
pub fn photo_file_name(millis: i64, stem: Option<&str>, extension: &str) -> String {
    let stem: String = stem
        .unwrap_or("photo")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect();
    let stem = if stem.is_empty() { "photo".to_string() } else { stem };
    format!("{millis}-{stem}.{extension}")
}

/// Copies an uploaded image into `uploads_dir` and returns its public path.
/// Empty uploads mean "no new photo".
pub async fn store_photo(
    photo: Option<&mut TempFile<'_>>,
    uploads_dir: &str,
) -> Result<Option<String>, AppError> {
    let Some(photo) = photo.filter(|p| p.len() > 0) else {
        return Ok(None);
    };

    let content_type = photo
        .content_type()
        .filter(|ct| ct.top() == "image")
        .ok_or_else(|| AppError::Validation("photo must be an image".into()))?;
    let extension = content_type
        .extension()
        .map(|ext| ext.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "img".into());

    let file_name = photo_file_name(
        Utc::now().timestamp_millis(),
        photo.name(),
        &extension,
    );

    rocket::tokio::fs::create_dir_all(uploads_dir).await?;
    let target: PathBuf = Path::new(uploads_dir).join(&file_name);
    photo.copy_to(&target).await?;

    Ok(Some(format!("{PHOTO_ROUTE}/{file_name}")))
}

/// Maps a public photo path back to its file under `uploads_dir`. Anything that is
/// not a plain file name under [`PHOTO_ROUTE`] is left alone.
pub fn stored_photo_path(uploads_dir: &str, public: &str) -> Option<PathBuf> {
    let name = public.strip_prefix(PHOTO_ROUTE)?.strip_prefix('/')?;
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return None;
    }
    Some(Path::new(uploads_dir).join(name))
}

/// Removes a stored photo. Failures are logged, the row change already happened.
pub async fn discard_photo(uploads_dir: &str, public: Option<&str>) {
    let Some(path) = public.and_then(|p| stored_photo_path(uploads_dir, p)) else {
        return;
    };
    match rocket::tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove candidate photo"),
    }
}

fn order_taken(order_number: i32) -> AppError {
    AppError::Conflict(format!("order number {order_number} is already taken"))
}

pub async fn list(conn: &mut AsyncMysqlConnection) -> Result<Vec<Candidate>, AppError> {
    Ok(candidates::table
        .select(Candidate::as_select())
        .order(candidates::order_number.asc())
        .load(conn)
        .await?)
}

pub async fn find(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Candidate, AppError> {
    candidates::table
        .find(id)
        .select(Candidate::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound("candidate not found".into()))
}

pub async fn create(
    conn: &mut AsyncMysqlConnection,
    fields: CandidateFields,
    photo: Option<String>,
) -> Result<Candidate, AppError> {
    let at = now();
    let order_number = fields.order_number;
    let candidate = NewCandidate {
        id: Uuid::new_v4().to_string(),
        name: fields.name,
        class_name: fields.class_name,
        vision: fields.vision,
        mission: fields.mission,
        photo,
        order_number,
        created_at: at,
        updated_at: at,
    };

    diesel::insert_into(candidates::table)
        .values(&candidate)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                order_taken(order_number)
            } else {
                e.into()
            }
        })?;

    find(conn, &candidate.id).await
}

pub async fn update(
    conn: &mut AsyncMysqlConnection,
    id: &str,
    fields: CandidateFields,
    photo: Option<String>,
) -> Result<Candidate, AppError> {
    find(conn, id).await?;
    let order_number = fields.order_number;
    let changes = CandidateChanges {
        name: fields.name,
        class_name: fields.class_name,
        vision: fields.vision,
        mission: fields.mission,
        photo,
        order_number,
        updated_at: now(),
    };

    diesel::update(candidates::table.find(id))
        .set(&changes)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                order_taken(order_number)
            } else {
                e.into()
            }
        })?;

    find(conn, id).await
}

/// Candidates that already received ballots cannot be deleted.
pub async fn delete(conn: &mut AsyncMysqlConnection, id: &str) -> Result<Candidate, AppError> {
    let candidate = find(conn, id).await?;
    let ballots: i64 = votes::table
        .filter(votes::candidate_id.eq(id))
        .count()
        .get_result(conn)
        .await?;
    if ballots > 0 {
        return Err(AppError::Conflict(format!(
            "{} already has {} vote(s); reset votes first",
            candidate.name, ballots
        )));
    }
    diesel::delete(candidates::table.find(id)).execute(conn).await?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(order_number: i32) -> Result<CandidateFields, AppError> {
        CandidateFields::validate(
            " Ahmad Rizki ",
            "XII RPL 1",
            "An innovative and creative council",
            "Programs focused on student creativity",
            order_number,
            3,
        )
    }

    #[test]
    fn valid_candidate_is_trimmed() {
        let fields = validate(2).unwrap();
        assert_eq!(fields.name, "Ahmad Rizki");
        assert_eq!(fields.order_number, 2);
    }

    #[test]
    fn order_number_must_be_in_range() {
        assert!(matches!(validate(0), Err(AppError::Validation(_))));
        assert!(matches!(validate(4), Err(AppError::Validation(_))));
        assert!(validate(3).is_ok());
    }

    #[test]
    fn short_vision_is_rejected() {
        let err = CandidateFields::validate("Siti", "XII TKJ 1", "short", "long enough mission", 1, 3);
        assert!(matches!(err, Err(AppError::Validation(m)) if m.contains("vision")));
    }

    #[test]
    fn photo_names_are_sanitized() {
        assert_eq!(
            photo_file_name(1700000000000, Some("../../etc passwd"), "png"),
            "1700000000000-etcpasswd.png"
        );
        assert_eq!(photo_file_name(5, None, "jpeg"), "5-photo.jpeg");
        assert_eq!(photo_file_name(5, Some("..."), "jpeg"), "5-photo.jpeg");
    }

    #[test]
    fn stored_photo_path_stays_inside_uploads() {
        assert_eq!(
            stored_photo_path("/srv/uploads", "/uploads/1700000000000-ahmad.png"),
            Some(PathBuf::from("/srv/uploads/1700000000000-ahmad.png"))
        );
        assert_eq!(stored_photo_path("/srv/uploads", "/uploads/../Config.toml"), None);
        assert_eq!(stored_photo_path("/srv/uploads", "/uploads/a/b.png"), None);
        assert_eq!(stored_photo_path("/srv/uploads", "/uploads/"), None);
        assert_eq!(stored_photo_path("/srv/uploads", "https://cdn.example/a.png"), None);
    }

    #[rocket::async_test]
    async fn discard_photo_removes_only_the_named_file() {
        let dir = std::env::temp_dir().join(format!("osis-vote-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let uploads = dir.to_str().unwrap();
        std::fs::write(dir.join("1-old.png"), b"old").unwrap();
        std::fs::write(dir.join("2-new.png"), b"new").unwrap();

        discard_photo(uploads, Some("/uploads/1-old.png")).await;
        discard_photo(uploads, Some("/uploads/1-old.png")).await;
        discard_photo(uploads, None).await;

        assert!(!dir.join("1-old.png").exists());
        assert!(dir.join("2-new.png").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
