use crate::api::types::FilePart;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Content type for an attachment, from its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "mp4" | "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        _ => "application/octet-stream",
    }
}

pub async fn read_attachment(path: &Path) -> std::io::Result<FilePart> {
    let bytes = fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    debug!("read {} ({} bytes)", path.display(), bytes.len());
    Ok(FilePart::new(file_name, mime_for_path(path), bytes))
}

/// Writes a downloaded document into `dir`, creating it if needed. Only the
/// final path component of `name` is used.
pub async fn save_document(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document.pdf".to_string());
    fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("id.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("/tmp/policy.pdf")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_read_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mulkiya.png");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let part = read_attachment(&path).await.unwrap();
        assert_eq!(part.file_name, "mulkiya.png");
        assert_eq!(part.mime_type, "image/png");
        assert_eq!(part.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_missing_attachment() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_attachment(&dir.path().join("nope.pdf")).await.is_err());
    }

    #[tokio::test]
    async fn test_save_document_creates_dir_and_strips_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("downloads");

        let path = save_document(&target, "../../quote.pdf", b"%PDF").await.unwrap();
        assert_eq!(path, target.join("quote.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");
    }
}
