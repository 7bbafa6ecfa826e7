//! Authenticated caller

use sh_core::traits::{Id, Identifiable};

/// The user a request acts on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Id,
    pub email: Option<String>,
}

impl CurrentUser {
    pub fn new(id: Id, email: Option<String>) -> Self {
        Self { id, email }
    }
}

impl Identifiable for CurrentUser {
    fn id(&self) -> Id {
        self.id
    }
}
