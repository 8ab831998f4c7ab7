use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    QuestionAnswered,
    StreakBonus,
    AchievementUnlock,
    MilestoneComplete,
    ReviewComplete,
    DailyGoalMet,
}

stored_object!(XpLedgerEntry, "xp_ledger_entry", {
    owner_id: String,
    amount: i64,
    source: XpSource,
    metadata: Option<serde_json::Value>,
    idempotency_key: String
});

impl XpLedgerEntry {
    pub fn new(
        owner_id: String,
        amount: i64,
        source: XpSource,
        metadata: Option<serde_json::Value>,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            amount,
            source,
            metadata,
            idempotency_key,
        }
    }

    pub async fn total_for_owner(owner_id: &str, db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(serde::Deserialize)]
        struct Total {
            total: Option<i64>,
        }

        let totals: Vec<Total> = db
            .client
            .query(
                "SELECT math::sum(amount) AS total FROM type::table($table) \
                 WHERE owner_id = $owner_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;

        Ok(totals.into_iter().next().and_then(|t| t.total).unwrap_or(0))
    }
}
