pub mod attachment;
pub mod checksum;
pub mod error;
pub mod ids;
pub mod paste;
pub mod paths;
pub mod user;

pub use attachment::{Attachment, AttachmentSource, NewAttachment};
pub use error::PasteError;
pub use paste::{CreatePaste, Paste, Visibility};
pub use user::{User, ANONYMOUS_USER_ID, ANONYMOUS_USERNAME};
