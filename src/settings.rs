use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PayrelayError, Result};

/// Source column names for each payment role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "default_amount_column")]
    pub amount: String,
    #[serde(default = "default_date_column")]
    pub date: String,
    #[serde(default = "default_transaction_id_column")]
    pub transaction_id: String,
    #[serde(default = "default_customer_id_column")]
    pub customer_id: String,
}

fn default_amount_column() -> String {
    "amount".to_string()
}

fn default_date_column() -> String {
    "date".to_string()
}

fn default_transaction_id_column() -> String {
    "transaction_id".to_string()
}

fn default_customer_id_column() -> String {
    "customer_id".to_string()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            amount: default_amount_column(),
            date: default_date_column(),
            transaction_id: default_transaction_id_column(),
            customer_id: default_customer_id_column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_download_folder")]
    pub download_folder: String,
    #[serde(default = "default_filter_column")]
    pub filter_column: String,
    #[serde(default = "default_filter_value")]
    pub filter_value: String,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default = "default_keep_recent_downloads")]
    pub keep_recent_downloads: usize,
}

fn default_download_folder() -> String {
    "./downloads".to_string()
}

fn default_filter_column() -> String {
    "status".to_string()
}

fn default_filter_value() -> String {
    "completed".to_string()
}

fn default_keep_recent_downloads() -> usize {
    5
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
            filter_column: default_filter_column(),
            filter_value: default_filter_value(),
            columns: ColumnMapping::default(),
            keep_recent_downloads: default_keep_recent_downloads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub basic_username: String,
    #[serde(default)]
    pub basic_password: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

pub fn default_batch_size() -> usize {
    50
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
            token: String::new(),
            basic_username: String::new(),
            basic_password: String::new(),
            batch_size: default_batch_size(),
        }
    }
}

impl WebhookSettings {
    /// Headers sent with every webhook request.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let token = self.token.trim();
        if !token.is_empty() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    /// Basic auth pair, only when both halves are set.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let user = self.basic_username.trim();
        let pass = self.basic_password.trim();
        if user.is_empty() || pass.is_empty() {
            return None;
        }
        Some((user.to_string(), pass.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_keep_last_n")]
    pub keep_last_n: usize,
}

fn default_ledger_path() -> String {
    "./logs/processed_emails.json".to_string()
}

fn default_keep_last_n() -> usize {
    1000
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            keep_last_n: default_keep_last_n(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxSettings {
    #[serde(default = "default_inbox_dir")]
    pub dir: String,
    #[serde(default = "default_inbox_limit")]
    pub limit: usize,
}

fn default_inbox_dir() -> String {
    "./inbox".to_string()
}

fn default_inbox_limit() -> usize {
    10
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self {
            dir: default_inbox_dir(),
            limit: default_inbox_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub inbox: InboxSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            processing: ProcessingSettings::default(),
            webhook: WebhookSettings::default(),
            ledger: LedgerSettings::default(),
            inbox: InboxSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Fails when no webhook URL is configured.
    pub fn require_webhook(&self) -> Result<()> {
        if self.webhook.url.trim().is_empty() {
            return Err(PayrelayError::Config(
                "webhook URL is not configured (set webhook.url or WEBHOOK_URL)".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlay values from the environment on top of the file settings.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, slot: &mut String| {
            if let Some(v) = lookup(key) {
                *slot = v;
            }
        };
        text("DOWNLOAD_FOLDER", &mut self.processing.download_folder);
        text("CSV_FILTER_COLUMN", &mut self.processing.filter_column);
        text("CSV_FILTER_VALUE", &mut self.processing.filter_value);
        text("PAYMENT_AMOUNT_COLUMN", &mut self.processing.columns.amount);
        text("PAYMENT_DATE_COLUMN", &mut self.processing.columns.date);
        text("PAYMENT_ID_COLUMN", &mut self.processing.columns.transaction_id);
        text("CUSTOMER_ID_COLUMN", &mut self.processing.columns.customer_id);
        text("WEBHOOK_URL", &mut self.webhook.url);
        text("WEBHOOK_TOKEN", &mut self.webhook.token);
        text("WEBHOOK_BASIC_USERNAME", &mut self.webhook.basic_username);
        text("WEBHOOK_BASIC_PASSWORD", &mut self.webhook.basic_password);
        text("LEDGER_PATH", &mut self.ledger.path);
        text("INBOX_DIR", &mut self.inbox.dir);
        text("LOG_LEVEL", &mut self.log_level);

        if let Some(v) = lookup("WEBHOOK_TIMEOUT") {
            match v.trim().parse() {
                Ok(secs) => self.webhook.timeout_secs = secs,
                Err(_) => log::warn!("Ignoring WEBHOOK_TIMEOUT={v}: not a number"),
            }
        }
        if let Some(v) = lookup("WEBHOOK_BATCH_SIZE") {
            match v.trim().parse() {
                Ok(size) => self.webhook.batch_size = size,
                Err(_) => log::warn!("Ignoring WEBHOOK_BATCH_SIZE={v}: not a number"),
            }
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("payrelay")
}

pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Read settings from `path`; a missing or malformed file yields defaults.
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Ignoring malformed settings file {}: {e}", path.display());
            Settings::default()
        }
    }
}

/// File settings (explicit path or the default location) plus env overrides.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings_from(&path);
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| PayrelayError::Config(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.webhook.url = "https://hooks.example.com/pay".to_string();
        settings.processing.columns.amount = "Сумма".to_string();
        save_settings(&settings, &path).unwrap();
        let loaded = load_settings_from(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_returns_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from(&dir.path().join("nope.json"));
        assert_eq!(s.processing.filter_column, "status");
        assert_eq!(s.processing.filter_value, "completed");
        assert_eq!(s.webhook.batch_size, 50);
        assert_eq!(s.webhook.timeout_secs, 30);
        assert_eq!(s.ledger.keep_last_n, 1000);
    }

    #[test]
    fn test_load_returns_defaults_when_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"webhook": {"url": "http://x"}, "processing": {"columns": {"amount": "Sum"}}}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.webhook.url, "http://x");
        assert_eq!(s.webhook.batch_size, 50);
        assert_eq!(s.processing.columns.amount, "Sum");
        assert_eq!(s.processing.columns.date, "date");
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WEBHOOK_URL", "https://env.example.com"),
            ("WEBHOOK_TIMEOUT", "5"),
            ("WEBHOOK_BATCH_SIZE", "lots"),
            ("CSV_FILTER_VALUE", "отменен"),
        ]
        .into_iter()
        .collect();
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.webhook.url, "https://env.example.com");
        assert_eq!(s.webhook.timeout_secs, 5);
        assert_eq!(s.webhook.batch_size, 50);
        assert_eq!(s.processing.filter_value, "отменен");
    }

    #[test]
    fn test_headers_without_token() {
        let w = WebhookSettings::default();
        let headers = w.headers();
        assert!(headers.iter().all(|(k, _)| k != "Authorization"));
        assert!(w.basic_auth().is_none());
    }

    #[test]
    fn test_headers_with_token() {
        let w = WebhookSettings {
            token: " secret-token ".to_string(),
            ..WebhookSettings::default()
        };
        assert!(w
            .headers()
            .contains(&("Authorization".to_string(), "Bearer secret-token".to_string())));
    }

    #[test]
    fn test_basic_auth_needs_both_halves() {
        let mut w = WebhookSettings {
            basic_username: "user".to_string(),
            ..WebhookSettings::default()
        };
        assert!(w.basic_auth().is_none());
        w.basic_password = "pass".to_string();
        assert_eq!(w.basic_auth(), Some(("user".to_string(), "pass".to_string())));
    }

    #[test]
    fn test_require_webhook() {
        let mut s = Settings::default();
        assert!(matches!(s.require_webhook(), Err(PayrelayError::Config(_))));
        s.webhook.url = "http://localhost".to_string();
        assert!(s.require_webhook().is_ok());
    }
}
