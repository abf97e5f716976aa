//! Image detection in user messages.
//!
//! Any whitespace-separated word naming an existing `.png`, `.jpg`, `.jpeg`
//! or `.webp` file is attached to the turn as an inline image. The message
//! text itself is sent unchanged.

use crate::runtime::ImagePart;
use base64::Engine;
use std::path::{Path, PathBuf};

const SUPPORTED_FORMATS: &[(&str, &str)] = &[
    (".png", "image/png"),
    (".webp", "image/webp"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
];

const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// An image found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub image: ImagePart,
}

fn media_type(word: &str) -> Option<&'static str> {
    let lower = word.to_ascii_lowercase();
    SUPPORTED_FORMATS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, media_type)| *media_type)
}

/// Images named in `text`, resolved against `working_dir` when relative.
///
/// Words that do not name a readable file are left alone.
pub fn attach_images(text: &str, working_dir: &Path) -> Vec<Attachment> {
    text.split_whitespace()
        .filter_map(|word| {
            let media_type = media_type(word)?;
            let path = working_dir.join(word);
            match load(&path) {
                Ok(data) => {
                    tracing::debug!(path = %path.display(), media_type, "Attaching image");
                    Some(Attachment {
                        path,
                        image: ImagePart {
                            media_type: media_type.to_string(),
                            data,
                        },
                    })
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Not attaching image: {e}");
                    None
                }
            }
        })
        .collect()
}

fn load(path: &Path) -> Result<String, String> {
    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if !metadata.is_file() {
        return Err("not a file".into());
    }
    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(format!(
            "too large: {} bytes (max {MAX_IMAGE_BYTES})",
            metadata.len()
        ));
    }
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_media_type_by_extension() {
        assert_eq!(media_type("shot.PNG"), Some("image/png"));
        assert_eq!(media_type("a.jpeg"), Some("image/jpeg"));
        assert_eq!(media_type("a.JPG"), Some("image/jpeg"));
        assert_eq!(media_type("b.webp"), Some("image/webp"));
        assert_eq!(media_type("c.gif"), None);
        assert_eq!(media_type("png"), None);
    }

    #[test]
    fn test_existing_images_are_attached_in_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("first.png"), b"\x89PNG").unwrap();
        std::fs::write(dir.path().join("second.JPG"), b"hello").unwrap();

        let attached = attach_images("compare first.png with second.JPG please", dir.path());

        assert_eq!(attached.len(), 2);
        assert_eq!(attached[0].path, dir.path().join("first.png"));
        assert_eq!(attached[0].image.media_type, "image/png");
        assert_eq!(attached[0].image.data, "iVBORw==");
        assert_eq!(attached[1].image.media_type, "image/jpeg");
        assert_eq!(attached[1].image.data, "aGVsbG8=");
    }

    #[test]
    fn test_missing_and_unsupported_files_are_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("folder.png")).unwrap();

        assert!(attach_images("see ghost.png notes.txt folder.png", dir.path()).is_empty());
        assert!(attach_images("no images here", dir.path()).is_empty());
    }

    #[test]
    fn test_absolute_path_ignores_working_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs.webp");
        std::fs::write(&path, b"RIFF").unwrap();

        let attached = attach_images(&format!("look {}", path.display()), Path::new("/nowhere"));
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].path, path);
    }
}
