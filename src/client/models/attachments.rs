// Images staged for the next chat message.
use std::path::PathBuf;

pub const MAX_IMAGES: usize = 4;
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2048;
pub const ALLOWED_IMAGE_TYPES: [&str; 5] = ["image/jpeg", "image/png", "image/gif", "image/webp", "image/svg+xml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    TooManyAttachments,
    MessageTooLong { max: usize },
    QueryTooShort { min: usize },
    EmptyMessage,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::TooManyAttachments => write!(f, "You can select at most {} images", MAX_IMAGES),
            ValidationError::MessageTooLong { max } => write!(f, "Message is longer than {} characters", max),
            ValidationError::QueryTooShort { min } => write!(f, "Type at least {} characters to search", min),
            ValidationError::EmptyMessage => write!(f, "Message is empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        StagedFile { name: name.into(), mime_type: mime_type.into(), bytes }
    }

    pub async fn from_path(path: PathBuf, mime_type: &str) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(StagedFile::new(name, mime_type, bytes))
    }

    pub fn is_allowed(&self) -> bool {
        ALLOWED_IMAGE_TYPES.contains(&self.mime_type.as_str())
    }
}

/// Staged attachment set for one composer.
#[derive(Debug, Clone, Default)]
pub struct StagedAttachments {
    files: Vec<StagedFile>,
}

impl StagedAttachments {
    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Stage a selection. Non-image files are dropped silently. If the
    /// selection does not fit, the first files that do are kept and the limit
    /// error is returned.
    pub fn add(&mut self, selection: Vec<StagedFile>) -> Result<usize, ValidationError> {
        let images: Vec<StagedFile> = selection.into_iter().filter(StagedFile::is_allowed).collect();
        if images.is_empty() {
            return Ok(0);
        }
        let free = MAX_IMAGES - self.files.len();
        if free == 0 {
            return Err(ValidationError::TooManyAttachments);
        }
        let overflow = images.len() > free;
        let added = images.len().min(free);
        self.files.extend(images.into_iter().take(free));
        if overflow {
            Err(ValidationError::TooManyAttachments)
        } else {
            Ok(added)
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<StagedFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// Characters left for the message counter. Negative when over the limit.
pub fn remaining(text: &str, max_chars: usize) -> i64 {
    max_chars as i64 - text.chars().count() as i64
}

pub fn validate_message(text: &str, max_chars: usize, has_attachments: bool) -> Result<(), ValidationError> {
    if text.trim().is_empty() && !has_attachments {
        return Err(ValidationError::EmptyMessage);
    }
    if remaining(text, max_chars) < 0 {
        return Err(ValidationError::MessageTooLong { max: max_chars });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(n: usize) -> Vec<StagedFile> {
        (0..n).map(|i| StagedFile::new(format!("{}.png", i), "image/png", vec![0u8; 4])).collect()
    }

    #[test]
    fn fifth_image_is_rejected() {
        let mut staged = StagedAttachments::default();
        assert_eq!(staged.add(png(4)), Ok(4));
        let err = staged.add(png(1)).unwrap_err();
        assert_eq!(err.to_string(), "You can select at most 4 images");
        assert_eq!(staged.len(), 4);
    }

    #[test]
    fn overflowing_selection_keeps_what_fits() {
        let mut staged = StagedAttachments::default();
        staged.add(png(3)).unwrap();
        assert_eq!(staged.add(png(3)), Err(ValidationError::TooManyAttachments));
        assert_eq!(staged.len(), 4);
        assert_eq!(staged.files()[3].name, "0.png");
    }

    #[test]
    fn non_images_are_filtered() {
        let mut staged = StagedAttachments::default();
        let added = staged
            .add(vec![
                StagedFile::new("a.pdf", "application/pdf", vec![]),
                StagedFile::new("b.svg", "image/svg+xml", vec![]),
            ])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(staged.remove(0).unwrap().name, "b.svg");
        assert!(staged.remove(0).is_none());
    }

    #[test]
    fn message_counter() {
        assert_eq!(remaining("çok", 5), 2);
        assert_eq!(validate_message("   ", 10, false), Err(ValidationError::EmptyMessage));
        assert_eq!(validate_message("", 10, true), Ok(()));
        assert_eq!(
            validate_message("abcdef", 5, false),
            Err(ValidationError::MessageTooLong { max: 5 })
        );
    }
}
