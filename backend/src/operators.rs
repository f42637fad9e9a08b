// Committee accounts, managed by administrators

use diesel_async::AsyncMysqlConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use rocket_db_pools::diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::auth::{self, Role};
use crate::db::{is_unique_violation, now};
use crate::error::AppError;
use crate::models::{CreateCommitteeRequest, NewOperator, Operator, OperatorInfo};
use crate::schema::{operator_sessions, operators};

pub const USERNAME_MAX: usize = 50;
pub const NAME_MAX: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeFields {
    pub username: String,
    pub password: String,
    pub name: String,
}

impl CommitteeFields {
    pub fn validate(req: CreateCommitteeRequest) -> Result<Self, AppError> {
        let username = req.username.trim().to_string();
        let name = req.name.trim().to_string();

        let username_len = username.chars().count();
        if username_len < 3 || username_len > USERNAME_MAX {
            return Err(AppError::Validation(format!(
                "username must be 3 to {USERNAME_MAX} characters"
            )));
        }
        if req.password.chars().count() < 6 {
            return Err(AppError::Validation("password must be at least 6 characters".into()));
        }
        let name_len = name.chars().count();
        if name_len < 2 || name_len > NAME_MAX {
            return Err(AppError::Validation(format!(
                "name must be 2 to {NAME_MAX} characters"
            )));
        }

        Ok(CommitteeFields {
            username,
            password: req.password,
            name,
        })
    }
}

pub async fn list_committee(conn: &mut AsyncMysqlConnection) -> Result<Vec<OperatorInfo>, AppError> {
    let rows: Vec<Operator> = operators::table
        .filter(operators::role.eq(Role::Committee.as_str()))
        .select(Operator::as_select())
        .order(operators::created_at.desc())
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(OperatorInfo::from).collect())
}

pub async fn create_committee(
    conn: &mut AsyncMysqlConnection,
    fields: CommitteeFields,
) -> Result<OperatorInfo, AppError> {
    let operator = NewOperator {
        id: Uuid::new_v4().to_string(),
        username: fields.username,
        password_hash: auth::hash_password(&fields.password).await?,
        name: fields.name,
        role: Role::Committee.as_str().to_string(),
        is_active: true,
        created_at: now(),
    };

    diesel::insert_into(operators::table)
        .values(&operator)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("username {} is already taken", operator.username))
            } else {
                e.into()
            }
        })?;

    info!(username = %operator.username, "Committee account created");
    Ok(OperatorInfo {
        id: operator.id,
        username: operator.username,
        name: operator.name,
        role: operator.role,
        is_active: operator.is_active,
    })
}

/// Enables or disables a committee account. Disabling also ends its sessions.
pub async fn set_committee_active(
    conn: &mut AsyncMysqlConnection,
    id: &str,
    active: bool,
) -> Result<OperatorInfo, AppError> {
    let id = id.to_string();
    let operator = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let mut operator: Operator = operators::table
                    .find(&id)
                    .filter(operators::role.eq(Role::Committee.as_str()))
                    .select(Operator::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::NotFound("committee member not found".into()))?;

                diesel::update(operators::table.find(&id))
                    .set(operators::is_active.eq(active))
                    .execute(conn)
                    .await?;
                if !active {
                    diesel::delete(
                        operator_sessions::table.filter(operator_sessions::operator_id.eq(&id)),
                    )
                    .execute(conn)
                    .await?;
                }

                operator.is_active = active;
                Ok(operator)
            }
            .scope_boxed()
        })
        .await?;

    info!(username = %operator.username, active, "Committee account updated");
    Ok(operator.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, password: &str, name: &str) -> CreateCommitteeRequest {
        CreateCommitteeRequest {
            username: username.into(),
            password: password.into(),
            name: name.into(),
        }
    }

    #[test]
    fn committee_fields_are_trimmed() {
        let fields = CommitteeFields::validate(request(" panitia1 ", "rahasia", " Bu Rina ")).unwrap();
        assert_eq!(fields.username, "panitia1");
        assert_eq!(fields.name, "Bu Rina");
        assert_eq!(fields.password, "rahasia");
    }

    #[test]
    fn committee_fields_enforce_minimum_lengths() {
        assert!(CommitteeFields::validate(request("ab", "rahasia", "Rina")).is_err());
        assert!(CommitteeFields::validate(request("panitia", "12345", "Rina")).is_err());
        assert!(CommitteeFields::validate(request("panitia", "123456", "R")).is_err());
        assert!(CommitteeFields::validate(request("panitia", "123456", "Ri")).is_ok());
    }

    #[test]
    fn committee_fields_fit_their_columns() {
        let username = "p".repeat(USERNAME_MAX);
        let name = "R".repeat(NAME_MAX);
        assert!(CommitteeFields::validate(request(&username, "123456", &name)).is_ok());

        let long_username = "p".repeat(USERNAME_MAX + 1);
        assert!(CommitteeFields::validate(request(&long_username, "123456", "Rina")).is_err());
        let long_name = "R".repeat(NAME_MAX + 1);
        assert!(CommitteeFields::validate(request("panitia", "123456", &long_name)).is_err());
    }
}
