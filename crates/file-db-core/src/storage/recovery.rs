use super::models::RecoveryStats;
use super::sqlite::Database;
use rusqlite::Result;
use tracing::info;

const STAGING_TABLES: &[&str] = &[
    "directory_stage",
    "directory_stage_process",
    "file_stage",
    "file_stage_process",
    "crawl_control_process",
    "hash_stage",
];

impl Database {
    /// Clear every staging buffer and release every outstanding crawl and hash claim.
    /// Run before any scheduler starts; whatever a crashed worker held is simply offered again.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let tx = self.write_transaction()?;

        let mut staged_rows_cleared = 0;
        for table in STAGING_TABLES {
            staged_rows_cleared += tx.execute(&format!("DELETE FROM {}", table), [])?;
        }

        let crawl_claims_released = tx.execute(
            "UPDATE crawl_control SET claimed_by = NULL, claimed_at = NULL \
             WHERE claimed_by IS NOT NULL",
            [],
        )?;
        let hash_claims_released = tx.execute(
            "UPDATE hash_control SET claimed_by = NULL, claimed_at = NULL \
             WHERE claimed_by IS NOT NULL",
            [],
        )?;
        tx.commit()?;

        let stats = RecoveryStats {
            staged_rows_cleared,
            crawl_claims_released,
            hash_claims_released,
        };
        info!(
            staged_rows = stats.staged_rows_cleared,
            crawl_claims = stats.crawl_claims_released,
            hash_claims = stats.hash_claims_released,
            "Recovered catalog scheduling state"
        );
        Ok(stats)
    }
}
