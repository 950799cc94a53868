use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::CONTENT_DISPOSITION;

use crate::error::{PayrelayError, Result};
use crate::files::FileKind;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Fetches the file behind a link and returns where it landed locally.
pub trait Downloader {
    fn download(&mut self, url: &str) -> Result<PathBuf>;
}

/// Unpacks an archive and returns the directory holding its contents.
pub trait ArchiveExtractor {
    fn extract(&self, archive: &Path) -> Result<PathBuf>;
}

impl<D: Downloader + ?Sized> Downloader for &mut D {
    fn download(&mut self, url: &str) -> Result<PathBuf> {
        (**self).download(url)
    }
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// Last path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, last) = path.rsplit_once('/')?;
    sanitize(last)
}

/// File name announced by a `Content-Disposition` header. `filename*`
/// (RFC 5987) wins over plain `filename`.
pub fn file_name_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for part in header.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.rsplit_once("''").map_or(value, |(_, v)| v);
                extended = percent_decode(encoded);
            }
            "filename" => plain = Some(value.to_string()),
            _ => {}
        }
    }
    extended.or(plain).and_then(|name| sanitize(&name))
}

fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// Only the final component; never a path that could leave the folder.
fn sanitize(name: &str) -> Option<String> {
    let last = name.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last.to_string())
    }
}

/// Pick the local name for a download: the server's `Content-Disposition`,
/// then the URL, then `download-<n>`. A name without a usable extension on a
/// zip body gets `.zip` appended.
pub fn download_name(disposition: Option<&str>, url: &str, content: &[u8], n: usize) -> String {
    let name = disposition
        .and_then(file_name_from_disposition)
        .or_else(|| file_name_from_url(url))
        .unwrap_or_else(|| format!("download-{n}"));
    if FileKind::from_name(Path::new(&name)) == FileKind::Unsupported && content.starts_with(ZIP_MAGIC) {
        format!("{name}.zip")
    } else {
        name
    }
}

// ---------------------------------------------------------------------------
// HttpDownloader
// ---------------------------------------------------------------------------

/// Copies local `file://` links and fetches `http(s)` links with a plain GET.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    folder: PathBuf,
    counter: usize,
}

impl HttpDownloader {
    pub fn new(folder: &Path, timeout_secs: u64) -> Result<Self> {
        std::fs::create_dir_all(folder)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            folder: folder.to_path_buf(),
            counter: 0,
        })
    }

    // Two links in one run may resolve to the same name.
    fn target_for(&mut self, name: &str) -> PathBuf {
        self.counter += 1;
        let target = self.folder.join(name);
        if !target.exists() {
            return target;
        }
        let path = Path::new(name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        match path.extension() {
            Some(ext) => self
                .folder
                .join(format!("{stem}-{}.{}", self.counter, ext.to_string_lossy())),
            None => self.folder.join(format!("{stem}-{}", self.counter)),
        }
    }

    fn copy_local(&mut self, source: &Path) -> Result<PathBuf> {
        if !source.exists() {
            return Err(PayrelayError::Download(format!("{} does not exist", source.display())));
        }
        if source.parent() == Some(self.folder.as_path()) {
            return Ok(source.to_path_buf());
        }
        let name = file_name_from_url(&source.to_string_lossy())
            .unwrap_or_else(|| format!("download-{}", self.counter + 1));
        let target = self.target_for(&name);
        std::fs::copy(source, &target)?;
        Ok(target)
    }

    fn fetch(&mut self, url: &str) -> Result<PathBuf> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(PayrelayError::Download(format!("{url} returned {status}")));
        }
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes()?;
        let name = download_name(disposition.as_deref(), url, &bytes, self.counter + 1);
        let target = self.target_for(&name);
        std::fs::write(&target, &bytes)?;
        Ok(target)
    }
}

impl Downloader for HttpDownloader {
    fn download(&mut self, url: &str) -> Result<PathBuf> {
        let path = if let Some(local) = url.strip_prefix("file://") {
            self.copy_local(Path::new(local))?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch(url)?
        } else {
            self.copy_local(Path::new(url))?
        };
        log::info!("Downloaded: {}", path.display());
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// ZipExtractor
// ---------------------------------------------------------------------------

/// Unpacks `.zip` downloads into `<folder>/extracted/<archive stem>`.
pub struct ZipExtractor {
    root: PathBuf,
}

impl ZipExtractor {
    pub fn new(download_folder: &Path) -> Self {
        Self {
            root: download_folder.join("extracted"),
        }
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path) -> Result<PathBuf> {
        let is_zip = archive
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Err(PayrelayError::UnsupportedFile(format!(
                "{} (only zip archives can be unpacked)",
                archive.display()
            )));
        }
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        let dest = self.root.join(stem);
        std::fs::create_dir_all(&dest)?;

        let mut reader = zip::ZipArchive::new(File::open(archive)?)?;
        let mut written = 0usize;
        for i in 0..reader.len() {
            let mut entry = reader.by_index(i)?;
            let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                log::warn!("Skipping unsafe archive entry {} in {}", entry.name(), archive.display());
                continue;
            };
            let out_path = dest.join(relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
            written += 1;
        }
        log::info!("Extracted {written} files from {} to {}", archive.display(), dest.display());
        Ok(dest)
    }
}
