//! Query helpers for the user summary slice.
//!
//! Accounts are owned by the auth collaborator; this subsystem only keeps
//! the summary columns it needs for the conversation sidebar and the sender
//! line of delivered messages.  `upsert_user` is the sync point the auth
//! layer calls when an account is created or its profile changes.

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::database::Database;
use crate::error::Result;
use crate::models::UserSummary;

impl Database {
    /// Insert or refresh a user summary record.
    pub async fn upsert_user(&self, user: &UserSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, image_url)
             VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE
                 SET name = EXCLUDED.name,
                     image_url = EXCLUDED.image_url",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.image_url)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a single user summary.
    pub async fn get_user_summary(&self, user_id: &str) -> Result<Option<UserSummary>> {
        let row = sqlx::query("SELECT id, name, image_url FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| row_to_summary(&r)).transpose()
    }

    /// List every user except the caller, ordered by name.  Serves the
    /// conversation sidebar.
    pub async fn list_users_except(&self, user_id: &str) -> Result<Vec<UserSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, image_url
             FROM users
             WHERE id <> $1
             ORDER BY name ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_summary).collect()
    }
}

/// Map a row to a [`UserSummary`].
fn row_to_summary(row: &PgRow) -> Result<UserSummary> {
    Ok(UserSummary {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        Some(Database::connect(&url).await.expect("test db should open"))
    }

    #[tokio::test]
    async fn upsert_and_sidebar_listing() {
        let Some(db) = test_db().await else { return };
        let caller = format!("caller-{}", Uuid::new_v4());
        let other = format!("other-{}", Uuid::new_v4());

        db.upsert_user(&UserSummary {
            id: caller.clone(),
            name: "Caller".to_string(),
            image_url: None,
        })
        .await
        .unwrap();
        db.upsert_user(&UserSummary {
            id: other.clone(),
            name: "Other".to_string(),
            image_url: Some("/avatars/other.png".to_string()),
        })
        .await
        .unwrap();

        let sidebar = db.list_users_except(&caller).await.unwrap();
        assert!(sidebar.iter().any(|u| u.id == other));
        assert!(!sidebar.iter().any(|u| u.id == caller));

        // Upsert refreshes in place rather than duplicating.
        db.upsert_user(&UserSummary {
            id: other.clone(),
            name: "Renamed".to_string(),
            image_url: None,
        })
        .await
        .unwrap();
        let refreshed = db.get_user_summary(&other).await.unwrap().unwrap();
        assert_eq!(refreshed.name, "Renamed");
        assert_eq!(refreshed.image_url, None);
    }
}
