use crate::assets::ImageAsset;

/// One versioned snapshot held by the session history.
///
/// `generated_preview` and `base_image` are only ever set together from the same asset,
/// so whenever a preview exists the next request is seeded with exactly that image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationDocument {
    generated_preview: Option<String>,
    custom_edit_text: String,
    background_edit_text: String,
    base_image: Option<ImageAsset>,
}

impl GenerationDocument {
    /// Starting point for a fresh session or after the base image changes.
    pub fn seed(base_image: Option<ImageAsset>) -> Self {
        Self {
            base_image,
            ..Self::default()
        }
    }

    /// Result of a successful generation; pending edit text has been consumed.
    pub fn generated(result: ImageAsset) -> Self {
        Self {
            generated_preview: Some(result.preview().to_string()),
            custom_edit_text: String::new(),
            background_edit_text: String::new(),
            base_image: Some(result),
        }
    }

    /// Result of an enhancement; pending edit text is carried over untouched.
    pub fn with_result(&self, result: ImageAsset) -> Self {
        Self {
            generated_preview: Some(result.preview().to_string()),
            custom_edit_text: self.custom_edit_text.clone(),
            background_edit_text: self.background_edit_text.clone(),
            base_image: Some(result),
        }
    }

    pub fn with_custom_edit_text(&self, text: impl Into<String>) -> Self {
        Self {
            custom_edit_text: text.into(),
            ..self.clone()
        }
    }

    pub fn with_background_edit_text(&self, text: impl Into<String>) -> Self {
        Self {
            background_edit_text: text.into(),
            ..self.clone()
        }
    }

    pub fn generated_preview(&self) -> Option<&str> {
        self.generated_preview.as_deref()
    }

    pub fn custom_edit_text(&self) -> &str {
        &self.custom_edit_text
    }

    pub fn background_edit_text(&self) -> &str {
        &self.background_edit_text
    }

    pub fn base_image(&self) -> Option<&ImageAsset> {
        self.base_image.as_ref()
    }

    pub fn is_refinement(&self) -> bool {
        self.generated_preview.is_some()
    }

    /// The generated image, when one exists (it doubles as the next base image).
    pub fn generated_image(&self) -> Option<&ImageAsset> {
        if self.generated_preview.is_some() {
            self.base_image.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::assets::{ImageAsset, MimeType};

    use super::GenerationDocument;

    #[test]
    fn generated_document_keeps_preview_and_base_in_sync() {
        let result = ImageAsset::new(vec![9, 9, 9], MimeType::Png);
        let doc = GenerationDocument::seed(None)
            .with_custom_edit_text("add a hat")
            .with_background_edit_text("beach");
        let next = GenerationDocument::generated(result.clone());
        assert_eq!(next.generated_preview(), Some(result.preview()));
        assert_eq!(next.base_image(), Some(&result));
        assert_eq!(next.custom_edit_text(), "");
        assert_eq!(next.background_edit_text(), "");
        assert!(next.is_refinement());
        assert!(!doc.is_refinement());
    }

    #[test]
    fn enhancement_result_preserves_pending_text() {
        let first = ImageAsset::new(vec![1], MimeType::Png);
        let enhanced = ImageAsset::new(vec![2], MimeType::Webp);
        let doc = GenerationDocument::generated(first).with_custom_edit_text("sunglasses");
        let next = doc.with_result(enhanced.clone());
        assert_eq!(next.custom_edit_text(), "sunglasses");
        assert_eq!(next.generated_image(), Some(&enhanced));
        assert_eq!(next.generated_preview(), Some(enhanced.preview()));
    }

    #[test]
    fn seed_has_base_but_no_generated_image() {
        let person = ImageAsset::new(vec![4, 5], MimeType::Jpeg);
        let doc = GenerationDocument::seed(Some(person.clone()));
        assert_eq!(doc.base_image(), Some(&person));
        assert_eq!(doc.generated_image(), None);
    }
}
