use overuse_core::UserPackageSettingsEntry;
use rusqlite::params;

use crate::Db;
use crate::error::Result;
use crate::helpers::{row_to_settings_entry, user_to_sql};

impl Db {
    pub fn save_user_package_settings(
        &mut self,
        entries: &[UserPackageSettingsEntry],
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO user_package_settings (user_id, package_name, killable_state)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id, package_name) DO UPDATE SET
                  killable_state = excluded.killable_state
                "#,
            )?;
            for entry in entries {
                written += stmt.execute(params![
                    user_to_sql(entry.user),
                    entry.package_name,
                    entry.killable_state.code(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn user_package_settings(&self) -> Result<Vec<UserPackageSettingsEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, package_name, killable_state
            FROM user_package_settings
            ORDER BY user_id ASC, package_name ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_settings_entry(row)?);
        }
        Ok(entries)
    }

    /// Removes the settings row and every usage row of a user package.
    pub fn delete_user_package(&mut self, user_id: u32, package_name: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM user_package_settings WHERE user_id = ?1 AND package_name = ?2",
            params![i64::from(user_id), package_name],
        )?;
        tx.execute(
            "DELETE FROM io_usage_stats WHERE user_id = ?1 AND package_name = ?2",
            params![i64::from(user_id), package_name],
        )?;
        tx.commit()?;
        Ok(())
    }
}
