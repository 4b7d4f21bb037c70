//! Declared media-type check for uploads.
//!
//! Only the client-supplied content type is inspected; the bytes are never
//! sniffed. Deployments needing a real signature check must add one in front
//! of the store.

use mime::Mime;
use thiserror::Error;

const IMAGE_PREFIX: &str = "image/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeRejection {
    #[error("Uploaded file must be an image (no content type declared).")]
    Missing,

    #[error("Uploaded file must be an image (got '{0}').")]
    NotImage(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentTypeGuard;

impl ContentTypeGuard {
    pub fn new() -> Self {
        Self
    }

    /// Accepts any declaration starting with `image/`, case-insensitively.
    ///
    /// The remainder is not validated: `image/png; name` passes, as does a
    /// bare `image/`.
    pub fn check(&self, declared: Option<&str>) -> Result<(), ContentTypeRejection> {
        let declared = declared
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(ContentTypeRejection::Missing)?;

        if has_image_prefix(declared) {
            return Ok(());
        }

        Err(ContentTypeRejection::NotImage(essence(declared)))
    }
}

fn has_image_prefix(declared: &str) -> bool {
    declared
        .get(..IMAGE_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(IMAGE_PREFIX))
}

/// `type/subtype` without parameters when the declaration parses, else as sent.
fn essence(declared: &str) -> String {
    match declared.parse::<Mime>() {
        Ok(parsed) => parsed.essence_str().to_string(),
        Err(_) => declared.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_image_types() {
        let guard = ContentTypeGuard::new();
        for ct in [
            "image/jpeg",
            "image/png",
            "IMAGE/GIF",
            "image/webp; charset=binary",
            " image/svg+xml ",
        ] {
            assert!(guard.check(Some(ct)).is_ok(), "{ct} should be accepted");
        }
    }

    #[test]
    fn test_accepts_anything_with_image_prefix() {
        let guard = ContentTypeGuard::new();
        for ct in ["image/", "image/png; name", "image/x y", "image/jpeg, image/png"] {
            assert_eq!(guard.check(Some(ct)), Ok(()), "{ct} should be accepted");
        }
    }

    #[test]
    fn test_rejects_missing() {
        let guard = ContentTypeGuard::new();
        assert_eq!(guard.check(None), Err(ContentTypeRejection::Missing));
        assert_eq!(guard.check(Some("  ")), Err(ContentTypeRejection::Missing));
    }

    #[test]
    fn test_rejects_non_images() {
        let guard = ContentTypeGuard::new();
        assert_eq!(
            guard.check(Some("text/plain; charset=utf-8")),
            Err(ContentTypeRejection::NotImage("text/plain".to_string()))
        );
        assert!(matches!(
            guard.check(Some("application/octet-stream")),
            Err(ContentTypeRejection::NotImage(_))
        ));
        assert_eq!(
            guard.check(Some("not a type")),
            Err(ContentTypeRejection::NotImage("not a type".to_string()))
        );
    }

    #[test]
    fn test_prefix_edge_cases() {
        let guard = ContentTypeGuard::new();
        for ct in ["image", "imag", "imagex/png", "x-image/png", "video/image/png", "é"] {
            assert!(
                matches!(guard.check(Some(ct)), Err(ContentTypeRejection::NotImage(_))),
                "{ct} should be rejected"
            );
        }
    }
}
