use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    #[serde(default)]
    total_xp: i64
});

/// Cumulative XP required to reach level `level`, per the closed-form level curve.
/// `xp_for_level(1) = 1000`.
fn xp_for_level(level: u32) -> i64 {
    (1000.0 * f64::from(level).powf(1.5)).floor() as i64
}

impl User {
    /// Derives level from total XP: the highest level whose cumulative threshold has been
    /// reached. Never reads Attempts; XP total is the sole source of truth.
    pub fn level(&self) -> u32 {
        let mut level = 1;
        while xp_for_level(level + 1) <= self.total_xp {
            level += 1;
        }
        level
    }

    pub async fn get_or_create(owner_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        if let Some(existing) = db.get_item::<User>(owner_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let user = User {
            id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            total_xp: 0,
        };

        db.store_item(user.clone()).await?;
        Ok(user)
    }

    /// Applies a signed XP delta from a freshly appended ledger entry, keeping the
    /// denormalized total in sync. The ledger itself remains the source of truth.
    pub async fn apply_xp_delta(
        owner_id: &str,
        delta: i64,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        Self::get_or_create(owner_id, db).await?;

        let updated: Option<User> = db
            .client
            .query("UPDATE type::thing('user', $id) SET total_xp += $delta, updated_at = time::now() RETURN AFTER")
            .bind(("id", owner_id.to_string()))
            .bind(("delta", delta))
            .await?
            .take(0)?;

        updated.ok_or_else(|| AppError::NotFound(owner_id.to_string()))
    }
}
