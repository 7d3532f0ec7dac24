use crate::error::ValidationError;

pub const MAX_POST_CHARS: usize = 2000;
pub const MAX_COMMENT_CHARS: usize = 200;
pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_BIO_CHARS: usize = 500;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Post content that passed validation: trimmed, bounded, and either
/// non-empty or carrying an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    content: String,
    image: Option<String>,
}

impl PostDraft {
    pub fn new(content: &str, image: Option<&str>) -> Result<Self, ValidationError> {
        let content = content.trim();
        let image = image.map(str::trim).filter(|i| !i.is_empty());

        if content.is_empty() && image.is_none() {
            return Err(ValidationError::EmptyContent);
        }
        check_len(content, MAX_POST_CHARS)?;

        Ok(Self {
            content: content.to_string(),
            image: image.map(str::to_string),
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }
}

/// Validated comment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft(String);

impl CommentDraft {
    pub fn new(content: &str) -> Result<Self, ValidationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        check_len(content, MAX_COMMENT_CHARS)?;
        Ok(Self(content.to_string()))
    }

    pub fn content(&self) -> &str {
        &self.0
    }
}

/// Display name: trimmed, non-empty, bounded.
pub fn display_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::InvalidField("name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::InvalidField("name is too long"));
    }
    Ok(name.to_string())
}

/// Emails are compared case-insensitively, so they are stored lowercased.
pub fn email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ValidationError::InvalidField("a valid email is required")),
    }
}

pub fn password(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ValidationError::InvalidField(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

/// Empty bios are stored as absent.
pub fn bio(bio: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(bio) = bio.map(str::trim).filter(|b| !b.is_empty()) else {
        return Ok(None);
    };
    if bio.chars().count() > MAX_BIO_CHARS {
        return Err(ValidationError::InvalidField("bio is too long"));
    }
    Ok(Some(bio.to_string()))
}

fn check_len(content: &str, max: usize) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if len > max {
        return Err(ValidationError::ContentTooLong { len, max });
    }
    Ok(())
}
