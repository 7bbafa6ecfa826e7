//! Core traits shared across the workspace

use chrono::{DateTime, Utc};

/// Primary key type
pub type Id = i64;

/// Trait for entities that have a primary key
pub trait Identifiable {
    fn id(&self) -> Id;
}

/// Trait for entities with timestamps (created_at, updated_at)
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
}

/// Trait for entities owned by a single user
pub trait Owned {
    fn owner_id(&self) -> Id;

    fn is_owned_by(&self, user_id: Id) -> bool {
        self.owner_id() == user_id
    }
}
