use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};

/// Newest record timestamp already appended for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestCursor {
    pub container_id: String,
    pub last_timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub fn get_cursor(&self, container_id: &str) -> Result<Option<HarvestCursor>, StoreError> {
        let Some(raw) = self.harvest_cursors.get(container_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(Self::deserialize(&raw)?))
    }

    /// Moves the cursor forward; an older timestamp leaves it unchanged.
    pub fn advance_cursor(
        &self,
        container_id: &str,
        last_timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.get_cursor(container_id)? {
            if existing.last_timestamp >= last_timestamp {
                return Ok(());
            }
        }
        let cursor = HarvestCursor {
            container_id: container_id.to_string(),
            last_timestamp,
            updated_at: Utc::now(),
        };
        self.harvest_cursors
            .insert(container_id.as_bytes(), Self::serialize(&cursor)?)?;
        self.harvest_cursors.flush()?;
        Ok(())
    }

    /// Drops cursors of containers that no longer exist.
    pub fn prune_cursors(&self, live_ids: &[String]) -> Result<usize, StoreError> {
        let mut stale = Vec::new();
        for item in self.harvest_cursors.iter() {
            let (k, _) = item?;
            let id = String::from_utf8_lossy(&k);
            if !live_ids.iter().any(|live| live.as_str() == id) {
                stale.push(k);
            }
        }
        let count = stale.len();
        for key in stale {
            self.harvest_cursors.remove(key)?;
        }
        Ok(count)
    }
}
