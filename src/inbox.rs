use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::ledger::EmailLedger;

/// One message and the download links found in its body.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailDownloads {
    pub id: u64,
    pub links: Vec<String>,
}

/// Where messages come from. The pipeline only needs pending messages
/// and a way to flag them once handled.
pub trait MailSource {
    fn fetch_pending(&mut self, ledger: &EmailLedger, limit: usize) -> Result<Vec<EmailDownloads>>;
    fn mark_as_read(&mut self, id: u64) -> Result<()>;
}

impl<M: MailSource + ?Sized> MailSource for &mut M {
    fn fetch_pending(&mut self, ledger: &EmailLedger, limit: usize) -> Result<Vec<EmailDownloads>> {
        (**self).fetch_pending(ledger, limit)
    }

    fn mark_as_read(&mut self, id: u64) -> Result<()> {
        (**self).mark_as_read(id)
    }
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
            .expect("anchor pattern")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern"))
}

fn download_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)download|attachment|\.zip$|\.rar$|\.7z$|file\.php\?|download\.php\?|attachment\.php\?",
        )
        .expect("download pattern")
    })
}

/// Hrefs of anchors that look like file downloads, in document order.
pub fn extract_download_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    for caps in anchor_re().captures_iter(html) {
        let href = caps[1].trim().replace("&amp;", "&");
        let text = tag_re().replace_all(&caps[2], "").to_lowercase();
        let is_download = download_re().is_match(&href) || download_re().is_match(text.trim());
        let absolute = href.starts_with("http") || href.starts_with("file://");
        if is_download && absolute && !links.contains(&href) {
            links.push(href);
        }
    }
    log::debug!("Found {} download links", links.len());
    links
}

/// A directory of `<id>.html` message bodies standing in for a mailbox.
/// Handled messages get an `<id>.read` marker.
pub struct LocalInbox {
    dir: PathBuf,
}

impl LocalInbox {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn marker(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.read"))
    }

    fn message_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_html = path
                .extension()
                .map_or(false, |e| e.eq_ignore_ascii_case("html"));
            if !is_html {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl MailSource for LocalInbox {
    fn fetch_pending(&mut self, ledger: &EmailLedger, limit: usize) -> Result<Vec<EmailDownloads>> {
        if !self.dir.exists() {
            log::warn!("Inbox {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }
        let ids: Vec<u64> = self
            .message_ids()?
            .into_iter()
            .filter(|id| {
                if ledger.is_processed(*id) {
                    log::debug!("Skipping already processed email {id}");
                    return false;
                }
                !self.marker(*id).exists()
            })
            .collect();
        let start = ids.len().saturating_sub(limit);

        let mut pending = Vec::new();
        for id in &ids[start..] {
            let body = std::fs::read_to_string(self.dir.join(format!("{id}.html")))?;
            let links = extract_download_links(&body);
            if links.is_empty() {
                log::info!("Email {id} has no download links");
                continue;
            }
            pending.push(EmailDownloads { id: *id, links });
        }
        Ok(pending)
    }

    fn mark_as_read(&mut self, id: u64) -> Result<()> {
        std::fs::write(self.marker(id), "")?;
        Ok(())
    }
}
