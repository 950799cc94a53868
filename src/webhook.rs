use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{PayrelayError, Result};
use crate::models::{Cell, PaymentCandidate};
use crate::settings::WebhookSettings;

const CURRENCY_SYMBOLS: &[(char, &str)] = &[
    ('$', "USD"),
    ('€', "EUR"),
    ('₽', "RUB"),
    ('£', "GBP"),
    ('¥', "JPY"),
];
const DEFAULT_CURRENCY: &str = "RUB";

const PURPOSE_COLUMNS: &[&str] = &["Назначение платежа", "назначение платежа"];
const METADATA_COLUMNS: &[&str] = &[
    "description",
    "reference",
    "account",
    "bank",
    "method",
    "fee",
    "tax",
    "net_amount",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
// Two-digit years go first: chrono's `%Y` also accepts "25".
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d.%m.%y", "%d.%m.%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y", "%Y%m%d",
];
const MIN_YEAR: i32 = 1000;

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

// ---------------------------------------------------------------------------
// Per-payment formatting
// ---------------------------------------------------------------------------

/// Amount as it goes on the wire: whole numbers without a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Whole(i64),
    Fractional(f64),
}

impl Amount {
    fn from_f64(v: f64) -> Option<Amount> {
        if !v.is_finite() {
            return None;
        }
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Some(Amount::Whole(v as i64))
        } else {
            Some(Amount::Fractional(v))
        }
    }
}

pub fn format_amount(cell: &Cell) -> Option<Amount> {
    match cell {
        Cell::Null => None,
        Cell::Int(i) => Some(Amount::Whole(*i)),
        Cell::Float(f) => Amount::from_f64(*f),
        Cell::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| {
                    !matches!(*c, ',' | ' ' | '\u{a0}')
                        && !CURRENCY_SYMBOLS.iter().any(|(sym, _)| sym == c)
                })
                .collect();
            match cleaned.parse::<f64>() {
                Ok(v) => Amount::from_f64(v),
                Err(_) => {
                    log::warn!("Could not format amount: {s}");
                    None
                }
            }
        }
    }
}

/// Currency code from a bare symbol in the amount; RUB when there is none.
pub fn extract_currency(cell: &Cell) -> &'static str {
    let text = cell.as_text().unwrap_or_default();
    CURRENCY_SYMBOLS
        .iter()
        .find(|(sym, _)| text.contains(*sym))
        .map(|(_, code)| *code)
        .unwrap_or(DEFAULT_CURRENCY)
}

/// Normalize a recognizable date to an ISO timestamp, else pass it through.
pub fn format_date(cell: &Cell) -> Option<String> {
    let raw = cell.as_text()?;
    let text = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string());
    }
    for fmt in DATETIME_FORMATS {
        match NaiveDateTime::parse_from_str(text, fmt) {
            Ok(dt) if dt.year() >= MIN_YEAR => {
                return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
            }
            _ => {}
        }
    }
    for fmt in DATE_FORMATS {
        match NaiveDate::parse_from_str(text, fmt) {
            Ok(d) if d.year() >= MIN_YEAR => {
                return Some(format!("{}T00:00:00", d.format("%Y-%m-%d")));
            }
            _ => {}
        }
    }
    log::warn!("Could not parse date: {text}");
    Some(raw)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedPayment {
    pub transaction_id: String,
    pub customer_id: Cell,
    pub amount: Option<Amount>,
    pub currency: &'static str,
    pub date: Option<String>,
    pub purpose: Option<String>,
    pub source_file: Option<String>,
    pub metadata: Map<String, Value>,
}

pub fn format_payment(payment: &PaymentCandidate) -> FormattedPayment {
    let purpose = PURPOSE_COLUMNS
        .iter()
        .filter_map(|col| payment.raw_row.get(*col))
        .find_map(Cell::as_text);

    let source_file = Path::new(&payment.source_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string());

    let mut metadata = Map::new();
    for col in METADATA_COLUMNS {
        if let Some(cell) = payment.raw_row.get(*col) {
            if !cell.is_null() {
                metadata.insert(col.to_string(), json!(cell));
            }
        }
    }

    FormattedPayment {
        transaction_id: payment.transaction_id.clone(),
        customer_id: payment.customer_id.clone(),
        amount: format_amount(&payment.amount),
        currency: extract_currency(&payment.amount),
        date: format_date(&payment.date),
        purpose,
        source_file,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PayloadData {
    pub payments_count: usize,
    pub payments: Vec<FormattedPayment>,
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub timestamp: String,
    pub data: PayloadData,
}

/// A slice of validated payments sent in one request.
pub struct WebhookBatch<'a> {
    /// 1-based position among the batches of one dispatch.
    pub position: usize,
    pub payments: &'a [PaymentCandidate],
}

impl WebhookBatch<'_> {
    pub fn payload(&self) -> WebhookPayload {
        WebhookPayload {
            timestamp: now_iso(),
            data: PayloadData {
                payments_count: self.payments.len(),
                payments: self.payments.iter().map(format_payment).collect(),
            },
        }
    }
}

/// Split `payments` into consecutive batches of at most `batch_size`.
pub fn batches(payments: &[PaymentCandidate], batch_size: usize) -> Vec<WebhookBatch<'_>> {
    payments
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| WebhookBatch {
            position: i + 1,
            payments: chunk,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub total: usize,
    pub batches_sent: usize,
    pub failed_batches: usize,
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Delivers one JSON body to the webhook endpoint.
pub trait Transport {
    fn post(&self, body: &Value) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(&self, body: &Value) -> Result<()> {
        (**self).post(body)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(&self, body: &Value) -> Result<()> {
        (**self).post(body)
    }
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    basic_auth: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(settings: &WebhookSettings) -> Result<Self> {
        if settings.url.trim().is_empty() {
            return Err(PayrelayError::Config("webhook URL is not configured".to_string()));
        }
        let mut headers = HeaderMap::new();
        for (name, value) in settings.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PayrelayError::Config(format!("bad header name {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| PayrelayError::Config(format!("bad header value: {e}")))?;
            headers.insert(name, value);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            url: settings.url.trim().to_string(),
            basic_auth: settings.basic_auth(),
        })
    }
}

impl Transport for HttpTransport {
    fn post(&self, body: &Value) -> Result<()> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                PayrelayError::Delivery("webhook request timed out".to_string())
            } else if e.is_connect() {
                PayrelayError::Delivery(format!("failed to connect to {}", self.url))
            } else {
                PayrelayError::Delivery(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response.text().unwrap_or_default();
        let excerpt: String = text.chars().take(1000).collect();
        if status.is_success() {
            log::info!("Webhook accepted with status {status}");
            log::debug!("Server response: {excerpt}");
            Ok(())
        } else {
            Err(PayrelayError::Delivery(format!("status {status}: {excerpt}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<T: Transport> {
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn send_batch(&self, batch: &WebhookBatch<'_>) -> Result<()> {
        let payload = batch.payload();
        log::info!(
            "Sending batch {} with {} payments",
            batch.position,
            payload.data.payments_count
        );
        for (i, p) in payload.data.payments.iter().enumerate() {
            log::debug!(
                "  Payment {}: id={} customer={} amount={:?} {} date={:?} purpose={:?}",
                i + 1,
                p.transaction_id,
                p.customer_id,
                p.amount,
                p.currency,
                p.date,
                p.purpose
            );
        }
        let body = serde_json::to_value(&payload)?;
        self.transport.post(&body)
    }

    /// Send every batch in order; a failed batch does not stop the rest.
    pub fn send_batches(&self, payments: &[PaymentCandidate], batch_size: usize) -> BatchReport {
        let mut batches_sent = 0usize;
        let mut failed_batches = 0usize;
        for batch in batches(payments, batch_size) {
            match self.send_batch(&batch) {
                Ok(()) => batches_sent += 1,
                Err(e) => {
                    failed_batches += 1;
                    log::error!("Failed to send batch {}: {e}", batch.position);
                }
            }
        }
        let attempted = batches_sent + failed_batches;
        let report = BatchReport {
            success: failed_batches == 0,
            total: payments.len(),
            batches_sent,
            failed_batches,
            success_rate: if attempted > 0 {
                batches_sent as f64 / attempted as f64
            } else {
                0.0
            },
        };
        log::info!(
            "Webhook batch results: {} sent, {} failed, {} payments",
            report.batches_sent,
            report.failed_batches,
            report.total
        );
        report
    }

    /// Post a connection-test body to the endpoint.
    pub fn test_connection(&self) -> Result<()> {
        let body = json!({
            "timestamp": now_iso(),
            "event_type": "connection_test",
            "data": {"message": "Test connection from payrelay"},
        });
        self.transport.post(&body)
    }
}
