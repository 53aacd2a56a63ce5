use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::archive::{extension_of, ZIP_EXTENSIONS, ZIP_MIME_TYPES};

pub const DEFAULT_BASENAME: &str = "appium-app";
const MAX_NAME_LEN: usize = 255;

static DISPOSITION_FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^attachment;.*?filename\*?="?([^";]+)"?"#).expect("disposition regex")
});
static UNSAFE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\?<>:*|"\x00-\x1f\x7f]"#).expect("unsafe chars regex"));

/// Where a downloaded application should be written and whether it must be
/// extracted afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadName {
    pub file_name: String,
    pub should_unzip: bool,
}

/// Replaces characters that are unsafe in file names and collapses reserved
/// names like `.` and `..`.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned = UNSAFE_CHARS_RE.replace_all(raw.trim(), "-");
    let cleaned = cleaned.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    let mut name: String = cleaned.chars().take(MAX_NAME_LEN).collect();
    if name.is_empty() {
        name = DEFAULT_BASENAME.to_string();
    }
    name
}

/// Picks a file name for a remote application, trusting signals in this
/// order: an archive extension in the URL path, a zip content type, then a
/// `Content-Disposition` attachment name. Without any of these the URL
/// basename is kept, falling back to the first accepted extension.
pub fn resolve_download_name(url: &Url, headers: &HeaderMap, accepted: &[String]) -> DownloadName {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
    let basename = decoded
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(sanitize_name);

    let mut file_name = None;
    let mut should_unzip = false;

    if let Some(base) = basename.as_deref() {
        if ZIP_EXTENSIONS.contains(&extension_of(Path::new(base)).as_str()) {
            file_name = Some(base.to_string());
            should_unzip = true;
        }
    }

    let content_type = header_str(headers, CONTENT_TYPE);
    if let Some(ct) = content_type.as_deref() {
        let mime = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        debug!(content_type = %ct, "remote application content type");
        if ZIP_MIME_TYPES.contains(&mime.as_str()) {
            should_unzip = true;
            if file_name.is_none() {
                let stem = basename
                    .as_deref()
                    .map(stem_of)
                    .unwrap_or_else(|| DEFAULT_BASENAME.to_string());
                file_name = Some(format!("{stem}.zip"));
            }
        }
    }

    if let Some(disposition) = header_str(headers, CONTENT_DISPOSITION) {
        if let Some(caps) = DISPOSITION_FILENAME_RE.captures(disposition.trim()) {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let decoded = percent_decode_str(raw.trim_start_matches("UTF-8''"))
                .decode_utf8_lossy()
                .into_owned();
            let candidate = sanitize_name(&decoded);
            debug!(file_name = %candidate, "content-disposition advertises a file name");
            if ZIP_EXTENSIONS.contains(&extension_of(Path::new(&candidate)).as_str()) {
                should_unzip = true;
            }
            if file_name.is_none() {
                file_name = Some(candidate);
            }
        }
    }

    let file_name = file_name.unwrap_or_else(|| {
        let stem = basename
            .as_deref()
            .map(stem_of)
            .unwrap_or_else(|| DEFAULT_BASENAME.to_string());
        let ext = basename
            .as_deref()
            .map(|base| extension_of(Path::new(base)))
            .filter(|ext| accepted.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .or_else(|| accepted.first().cloned())
            .unwrap_or_default();
        format!("{stem}{ext}")
    });

    DownloadName {
        file_name,
        should_unzip,
    }
}

/// Location of the copy of `url` inside the shared apps folder: the folder
/// joined with the URL path, query dropped. Parent references are skipped.
pub fn local_file_for_url(apps_dir: &Path, url: &Url) -> Option<PathBuf> {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
    let mut target = apps_dir.to_path_buf();
    let mut pushed = false;
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        if let Component::Normal(part) = component {
            target.push(part);
            pushed = true;
        }
    }
    pushed.then_some(target)
}

fn stem_of(base: &str) -> String {
    Path::new(base)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_BASENAME.to_string())
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn accepted() -> Vec<String> {
        vec![".apk".to_string(), ".aab".to_string()]
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn archive_extension_in_url_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"other.apk\""),
        );
        let name = resolve_download_name(&url("https://h/builds/app.zip?x=1"), &headers, &accepted());
        assert_eq!(name.file_name, "app.zip");
        assert!(name.should_unzip);
    }

    #[test]
    fn zip_mime_type_marks_archive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-zip-compressed; charset=binary"),
        );
        let name = resolve_download_name(&url("https://h/download"), &headers, &accepted());
        assert_eq!(name.file_name, "download.zip");
        assert!(name.should_unzip);
    }

    #[test]
    fn disposition_supplies_name_when_url_has_none() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"My App.ipa\""),
        );
        let name = resolve_download_name(&url("https://h/"), &headers, &accepted());
        assert_eq!(name.file_name, "My App.ipa");
        assert!(name.should_unzip);
    }

    #[test]
    fn falls_back_to_first_accepted_extension() {
        let name = resolve_download_name(&url("https://h/get/latest"), &HeaderMap::new(), &accepted());
        assert_eq!(name.file_name, "latest.apk");
        assert!(!name.should_unzip);

        let kept = resolve_download_name(&url("https://h/get/app.aab"), &HeaderMap::new(), &accepted());
        assert_eq!(kept.file_name, "app.aab");

        let bare = resolve_download_name(&url("https://h"), &HeaderMap::new(), &accepted());
        assert_eq!(bare.file_name, "appium-app.apk");
    }

    #[test]
    fn sanitizes_hostile_names() {
        assert_eq!(sanitize_name("a/b\\c?.apk"), "a-b-c-.apk");
        assert_eq!(sanitize_name(".."), DEFAULT_BASENAME);
    }

    #[test]
    fn shared_path_mirrors_url_path() {
        let root = Path::new("/srv/apps");
        assert_eq!(
            local_file_for_url(root, &url("https://h/builds/v1/app.apk?token=abc")),
            Some(PathBuf::from("/srv/apps/builds/v1/app.apk"))
        );
        assert_eq!(
            local_file_for_url(root, &url("https://h/a/../../etc/passwd")),
            Some(PathBuf::from("/srv/apps/etc/passwd"))
        );
        assert_eq!(local_file_for_url(root, &url("https://h/")), None);
    }
}
