use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id of the sentinel user that owns unauthenticated submissions.
pub const ANONYMOUS_USER_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const ANONYMOUS_USERNAME: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER_ID
    }
}

pub fn is_anonymous_id(id: &str) -> bool {
    id == ANONYMOUS_USER_ID
}
