pub mod attachments;
pub mod pastes;
pub mod users;

pub use pastes::Purged;
