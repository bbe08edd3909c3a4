//! Out-of-band downloads for links activated inside the editor surface.
//!
//! Links to known file types are not navigated; the file is fetched into a
//! temp location and the user picks where it goes.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::api::types::ApiError;

/// File extensions intercepted as downloads (compared case-insensitively).
pub const DOWNLOADABLE_EXTENSIONS: [&str; 13] = [
    "pdf", "zip", "doc", "docx", "xls", "xlsx", "png", "jpg", "jpeg", "gif", "bmp", "tiff",
    "webp",
];

const FALLBACK_FILE_NAME: &str = "download";

/// Whether a link target should be downloaded instead of navigated to.
pub fn is_downloadable(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };
    let Some(name) = url.path_segments().and_then(|mut segments| segments.next_back()) else {
        return false;
    };
    match Path::new(name).extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            DOWNLOADABLE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

static CONTENT_DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#)
        .expect("valid Content-Disposition pattern")
});

/// Reduce a server- or URL-provided name to a single safe path component.
fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if name.is_empty() || name == "." || name == ".." || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

/// File name from a `Content-Disposition` header, if it carries a usable one.
pub fn file_name_from_content_disposition(header: &str) -> Option<String> {
    let captures = CONTENT_DISPOSITION_FILENAME.captures(header)?;
    let raw = captures.get(1).or_else(|| captures.get(2))?.as_str();
    sanitize_file_name(raw)
}

/// Name suggested in the save dialog: `Content-Disposition`, else the last
/// URL path segment.
pub fn suggested_file_name(url: &Url, content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(file_name_from_content_disposition)
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(sanitize_file_name)
        })
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// A completed download waiting in the temp directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub suggested_name: String,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Download into `temp_dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Fetch `url` into a temp file.
    ///
    /// The caller owns the returned file and must move or delete it.
    pub async fn fetch(&self, url: &str) -> Result<DownloadedFile, ApiError> {
        let parsed = Url::parse(url).map_err(|e| ApiError::InvalidInput {
            message: format!("Invalid download URL '{url}': {e}"),
        })?;

        let mut resp = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| ApiError::NetworkError {
                message: format!("Download request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(ApiError::NetworkError {
                message: format!("Download failed: HTTP {}", resp.status()),
            });
        }

        let disposition = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let suggested_name = suggested_file_name(&parsed, disposition.as_deref());

        let path = self
            .temp_dir
            .join(format!("shotty-download-{}", Uuid::new_v4()));
        let bytes = stream_to_file(&mut resp, &path).await.inspect_err(|_| {
            let _ = std::fs::remove_file(&path);
        })?;

        log::info!(
            "Download complete: url={url}, name={suggested_name}, bytes={bytes}"
        );

        Ok(DownloadedFile {
            path,
            suggested_name,
            bytes,
        })
    }
}

/// Stream a response body into `path` chunk by chunk.
pub(crate) async fn stream_to_file(
    resp: &mut reqwest::Response,
    path: &Path,
) -> Result<u64, ApiError> {
    let io_err = |e: std::io::Error| ApiError::IoError {
        message: format!("Failed to write '{}': {e}", path.display()),
    };

    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut written = 0u64;

    while let Some(chunk) = resp.chunk().await.map_err(|e| ApiError::NetworkError {
        message: format!("Download stream error: {e}"),
    })? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_is_downloadable() {
        assert!(is_downloadable("https://example.com/files/report.PDF"));
        assert!(is_downloadable("https://example.com/a/b/archive.zip?token=1"));
        assert!(is_downloadable("http://localhost:5173/shot.webp#frag"));
        assert!(!is_downloadable("https://example.com/docs/"));
        assert!(!is_downloadable("https://example.com/page.html"));
        assert!(!is_downloadable("https://example.com/pdf"));
        assert!(!is_downloadable("not a url"));
    }

    #[test]
    fn test_content_disposition_file_name() {
        assert_eq!(
            file_name_from_content_disposition(r#"attachment; filename="Q3 report.xlsx""#),
            Some("Q3 report.xlsx".to_string())
        );
        assert_eq!(
            file_name_from_content_disposition("attachment; filename=notes.docx; size=3"),
            Some("notes.docx".to_string())
        );
        assert_eq!(
            file_name_from_content_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(file_name_from_content_disposition("inline"), None);
    }

    #[test]
    fn test_suggested_file_name_fallbacks() {
        let url = Url::parse("https://example.com/exports/chart.png").unwrap();
        assert_eq!(suggested_file_name(&url, None), "chart.png");
        assert_eq!(
            suggested_file_name(&url, Some("attachment; filename=final.png")),
            "final.png"
        );

        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(suggested_file_name(&root, None), FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn test_fetch_streams_to_temp_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="Report.pdf""#)
                    .set_body_bytes(b"%PDF-1.7 body".to_vec()),
            )
            .mount(&server)
            .await;

        let temp = std::env::temp_dir().join(format!("downloads_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp).unwrap();
        let downloader = Downloader::new(reqwest::Client::new()).with_temp_dir(temp.clone());

        let file = downloader
            .fetch(&format!("{}/files/report.pdf", server.uri()))
            .await
            .unwrap();
        assert_eq!(file.suggested_name, "Report.pdf");
        assert_eq!(file.bytes, 13);
        assert_eq!(std::fs::read(&file.path).unwrap(), b"%PDF-1.7 body");

        std::fs::remove_dir_all(&temp).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = Downloader::new(reqwest::Client::new());
        let result = downloader
            .fetch(&format!("{}/missing.zip", server.uri()))
            .await;
        assert!(matches!(result, Err(ApiError::NetworkError { .. })));
    }
}
