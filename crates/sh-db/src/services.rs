//! Service catalog lookups
//!
//! Table: services

use async_trait::async_trait;
use sh_core::traits::Id;
use sh_notifications::{ServiceCatalog, StoreResult};
use sqlx::PgPool;

use crate::repository::db;

/// Reads service ids from the catalog's `services` table
pub struct PgServiceCatalog {
    pool: PgPool,
}

impl PgServiceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceCatalog for PgServiceCatalog {
    async fn missing_services(&self, ids: &[Id]) -> StoreResult<Vec<Id>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let known = sqlx::query_scalar::<_, i64>("SELECT id FROM services WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        Ok(missing(ids, &known))
    }
}

fn missing(requested: &[Id], known: &[Id]) -> Vec<Id> {
    let mut missing: Vec<Id> = requested
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect();
    missing.sort_unstable();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_is_sorted_and_unique() {
        assert_eq!(missing(&[9, 2, 9, 4], &[4]), vec![2, 9]);
        assert!(missing(&[1, 2], &[2, 1]).is_empty());
    }
}
