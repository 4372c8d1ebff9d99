use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::NewAttachment;
use crate::error::PasteError;
use crate::user::is_anonymous_id;

pub const MAX_CONTENT_FORMAT_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub const ALL: &[Visibility] = &[
        Visibility::Public,
        Visibility::Unlisted,
        Visibility::Private,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "unlisted" => Some(Visibility::Unlisted),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paste {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub content: String,
    pub content_format: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Paste {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether `viewer_id` may read this paste.
    ///
    /// Private pastes are only readable by their owner, and the anonymous
    /// sentinel never counts as an owner.
    pub fn is_visible_to(&self, viewer_id: &str) -> bool {
        match self.visibility {
            Visibility::Public | Visibility::Unlisted => true,
            Visibility::Private => viewer_id == self.owner_id && !is_anonymous_id(viewer_id),
        }
    }
}

/// A paste creation request.
///
/// `slug` is `None` when the submitter left it blank; the service then
/// generates one.
#[derive(Debug)]
pub struct CreatePaste {
    pub slug: Option<String>,
    pub content: String,
    pub content_format: String,
    pub visibility: Visibility,
    pub expires_at: Option<DateTime<Utc>>,
    pub attachments: Vec<NewAttachment>,
}

impl CreatePaste {
    pub fn new(content: impl Into<String>, content_format: impl Into<String>) -> Self {
        Self {
            slug: None,
            content: content.into(),
            content_format: content_format.into(),
            visibility: Visibility::Public,
            expires_at: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_attachment(mut self, attachment: NewAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Intake checks performed before a request reaches the coordinator.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), PasteError> {
        if let Some(slug) = &self.slug {
            validate_slug("paste slug", slug)?;
        }
        if self.content.is_empty() {
            return Err(PasteError::ValidationFailed("content is empty".into()));
        }
        if self.content_format.is_empty()
            || self.content_format.len() > MAX_CONTENT_FORMAT_LEN
            || self.content_format.chars().any(|c| c.is_ascii_uppercase() || !c.is_ascii_graphic())
        {
            return Err(PasteError::ValidationFailed(format!(
                "content format must be 1-{MAX_CONTENT_FORMAT_LEN} lowercase characters"
            )));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(PasteError::ValidationFailed(
                    "expiry must be in the future".into(),
                ));
            }
        }
        for attachment in &self.attachments {
            validate_slug("attachment slug", &attachment.slug)?;
        }
        Ok(())
    }
}

fn validate_slug(what: &str, slug: &str) -> Result<(), PasteError> {
    if slug.is_empty() {
        return Err(PasteError::ValidationFailed(format!("{what} is empty")));
    }
    if !slug.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(PasteError::ValidationFailed(format!(
            "{what} must be printable ASCII"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::user::ANONYMOUS_USER_ID;

    fn paste(owner: &str, visibility: Visibility) -> Paste {
        Paste {
            id: "p1".into(),
            owner_id: owner.into(),
            slug: "abc".into(),
            content: "hello".into(),
            content_format: "text".into(),
            visibility,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn visibility_str_roundtrip() {
        for v in Visibility::ALL {
            assert_eq!(Visibility::parse_str(v.as_str()), Some(*v));
        }
        assert_eq!(Visibility::parse_str("secret"), None);
    }

    #[test]
    fn private_paste_visible_only_to_owner() {
        let p = paste("alice", Visibility::Private);
        assert!(p.is_visible_to("alice"));
        assert!(!p.is_visible_to("bob"));
        assert!(!p.is_visible_to(ANONYMOUS_USER_ID));
    }

    #[test]
    fn anonymous_private_paste_is_hidden_from_everyone() {
        let p = paste(ANONYMOUS_USER_ID, Visibility::Private);
        assert!(!p.is_visible_to(ANONYMOUS_USER_ID));
    }

    #[test]
    fn unlisted_and_public_visible_to_anyone() {
        assert!(paste("alice", Visibility::Unlisted).is_visible_to("bob"));
        assert!(paste("alice", Visibility::Public).is_visible_to(ANONYMOUS_USER_ID));
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let now = Utc::now();
        let mut p = paste("alice", Visibility::Public);
        assert!(!p.is_expired(now));
        p.expires_at = Some(now);
        assert!(p.is_expired(now));
        p.expires_at = Some(now + Duration::minutes(1));
        assert!(!p.is_expired(now));
    }

    #[test]
    fn validate_accepts_well_formed_request() {
        let now = Utc::now();
        let req = CreatePaste::new("hello", "markdown")
            .with_slug("abc123")
            .with_expiry(now + Duration::hours(1));
        req.validate(now).unwrap();
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let now = Utc::now();

        let err = CreatePaste::new("", "text").validate(now).unwrap_err();
        assert!(matches!(err, PasteError::ValidationFailed(_)));

        let err = CreatePaste::new("x", "Text").validate(now).unwrap_err();
        assert!(matches!(err, PasteError::ValidationFailed(_)));

        let long = "a".repeat(MAX_CONTENT_FORMAT_LEN + 1);
        assert!(CreatePaste::new("x", long).validate(now).is_err());

        let err = CreatePaste::new("x", "text")
            .with_slug("caf\u{e9}")
            .validate(now)
            .unwrap_err();
        assert!(matches!(err, PasteError::ValidationFailed(_)));

        let err = CreatePaste::new("x", "text")
            .with_expiry(now - Duration::seconds(1))
            .validate(now)
            .unwrap_err();
        assert!(matches!(err, PasteError::ValidationFailed(_)));
    }
}
