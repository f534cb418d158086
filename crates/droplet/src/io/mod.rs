pub mod report;

use std::fs;
use std::path::{Path, PathBuf};

use crate::{error::Result, types::PixelGrid};

pub use report::{write_log, EMPTY_BATCH_LINE};

/// Extensions accepted when scanning a folder, compared case-insensitively
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpeg", "jpg"];

/// Decode an image file into a grayscale grid
pub fn load_grid(path: &Path) -> Result<PixelGrid> {
    let image = image::open(path)?;
    Ok(PixelGrid::from_dynamic(&image))
}

/// File name used to identify an image in results and logs
pub fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Whether the file extension is one of `extensions`, ignoring case
pub fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.as_ref().eq_ignore_ascii_case(ext)))
}

/// Files directly inside `dir` with an accepted extension, sorted by path
pub fn collect_images<S: AsRef<str>>(dir: &Path, extensions: &[S]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extensions) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.JPG", "a.jpeg", "c.png", "notes.txt", "d.Jpg"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let found: Vec<String> = collect_images(dir.path(), DEFAULT_EXTENSIONS)
            .unwrap()
            .iter()
            .map(|p| image_name(p))
            .collect();
        assert_eq!(found, ["a.jpeg", "b.JPG", "d.Jpg"]);
    }

    #[test]
    fn custom_extension_list() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["x.tif", "y.png", "z.jpg"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = collect_images(dir.path(), &["png", "TIF"]).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn undecodable_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"not a jpeg").unwrap();
        let err = load_grid(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::UnreadableImage);
    }
}
