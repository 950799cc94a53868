use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::download::{ArchiveExtractor, Downloader};
use crate::error::{PayrelayError, Result};
use crate::extractor::Extractor;
use crate::files::{cleanup_old_downloads, find_csv_files, FileKind};
use crate::inbox::MailSource;
use crate::ledger::EmailLedger;
use crate::models::PaymentCandidate;
use crate::settings::Settings;
use crate::validator::is_valid;
use crate::webhook::{BatchReport, Dispatcher, Transport};

/// Accepted payments from a set of files plus what went wrong along the way.
#[derive(Debug, Default)]
pub struct FileOutcome {
    /// CSV tables that parsed, whether or not they held valid payments.
    pub tables_read: usize,
    pub payments: Vec<PaymentCandidate>,
    pub rejected: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub emails_processed: usize,
    pub files_downloaded: usize,
    pub payments_found: usize,
    pub webhook_sent: bool,
    pub errors: Vec<String>,
}

pub struct Pipeline<T: Transport> {
    extractor: Extractor,
    dispatcher: Dispatcher<T>,
    ledger: EmailLedger,
    batch_size: usize,
    keep_last_n: usize,
    inbox_limit: usize,
    download_folder: PathBuf,
    keep_recent_downloads: usize,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(settings: &Settings, transport: T) -> Self {
        Self {
            extractor: Extractor::new(&settings.processing),
            dispatcher: Dispatcher::new(transport),
            ledger: EmailLedger::load(Path::new(&settings.ledger.path)),
            batch_size: settings.webhook.batch_size,
            keep_last_n: settings.ledger.keep_last_n,
            inbox_limit: settings.inbox.limit,
            download_folder: PathBuf::from(&settings.processing.download_folder),
            keep_recent_downloads: settings.processing.keep_recent_downloads,
        }
    }

    pub fn ledger(&self) -> &EmailLedger {
        &self.ledger
    }

    fn extract_csv(&self, path: &Path, outcome: &mut FileOutcome) {
        match self.extractor.extract_file(path) {
            Ok(candidates) => {
                outcome.tables_read += 1;
                let before = candidates.len();
                let mut accepted = 0usize;
                for candidate in candidates {
                    if is_valid(&candidate) {
                        accepted += 1;
                        outcome.payments.push(candidate);
                    } else {
                        log::debug!(
                            "Skipping invalid payment record {} from {}",
                            candidate.transaction_id,
                            candidate.source_file
                        );
                        outcome.rejected += 1;
                    }
                }
                log::info!(
                    "Extracted {accepted} valid payment records of {before} from {}",
                    path.display()
                );
            }
            Err(e) => {
                log::error!("Error processing CSV file {}: {e}", path.display());
                outcome.errors.push(e.to_string());
            }
        }
    }

    fn extract_dir(&self, dir: &Path, outcome: &mut FileOutcome) {
        match find_csv_files(dir) {
            Ok(files) if files.is_empty() => {
                log::warn!("No CSV files found in {}", dir.display());
            }
            Ok(files) => {
                for file in files {
                    self.extract_csv(&file, outcome);
                }
            }
            Err(e) => {
                log::error!("Error finding CSV files in {}: {e}", dir.display());
                outcome.errors.push(e.to_string());
            }
        }
    }

    /// Extract and validate payments from downloaded files. One bad file never
    /// stops the others.
    pub fn process_files(
        &self,
        paths: &[PathBuf],
        archives: Option<&dyn ArchiveExtractor>,
    ) -> FileOutcome {
        let mut outcome = FileOutcome::default();
        for path in paths {
            log::info!("Processing file: {}", path.display());
            match FileKind::classify(path) {
                FileKind::Csv => self.extract_csv(path, &mut outcome),
                FileKind::Directory => self.extract_dir(path, &mut outcome),
                FileKind::Archive => match archives {
                    Some(extractor) => match extractor.extract(path) {
                        Ok(dir) => self.extract_dir(&dir, &mut outcome),
                        Err(e) => {
                            log::error!("Failed to extract archive {}: {e}", path.display());
                            outcome.errors.push(e.to_string());
                        }
                    },
                    None => {
                        let e = PayrelayError::UnsupportedFile(format!(
                            "{} (no archive extractor configured)",
                            path.display()
                        ));
                        log::error!("{e}");
                        outcome.errors.push(e.to_string());
                    }
                },
                FileKind::Unsupported => {
                    log::warn!("Unsupported file type for {}", path.display());
                    outcome
                        .errors
                        .push(PayrelayError::UnsupportedFile(path.display().to_string()).to_string());
                }
            }
        }
        log::info!("Total payments extracted: {}", outcome.payments.len());
        outcome
    }

    pub fn send_payments(&self, payments: &[PaymentCandidate]) -> BatchReport {
        self.dispatcher.send_batches(payments, self.batch_size)
    }

    pub fn test_connection(&self) -> Result<()> {
        self.dispatcher.test_connection()
    }

    fn download_all(&self, downloader: &mut dyn Downloader, links: &[String]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for link in links {
            match downloader.download(link) {
                Ok(path) => files.push(path),
                Err(e) => log::warn!("Failed to download from {link}: {e}"),
            }
        }
        files
    }

    /// One full pass: pending mail, downloads, extraction, delivery, housekeeping.
    pub fn run(
        &mut self,
        mail: &mut dyn MailSource,
        downloader: &mut dyn Downloader,
        archives: Option<&dyn ArchiveExtractor>,
    ) -> RunReport {
        let mut report = RunReport::default();
        log::info!("Starting email processing workflow");

        let pending = match mail.fetch_pending(&self.ledger, self.inbox_limit) {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("Failed to fetch emails: {e}");
                report.errors.push(format!("Failed to fetch emails: {e}"));
                return report;
            }
        };
        if pending.is_empty() {
            log::info!("No emails with download links found");
            report.success = true;
            return report;
        }
        report.emails_processed = pending.len();

        let mut all_payments = Vec::new();
        for email in pending {
            log::info!(
                "Processing email {} with {} download links",
                email.id,
                email.links.len()
            );
            let files = self.download_all(downloader, &email.links);
            report.files_downloaded += files.len();
            if files.is_empty() {
                log::warn!("No files downloaded from email {}", email.id);
                continue;
            }

            let outcome = self.process_files(&files, archives);
            let tables_read = outcome.tables_read;
            all_payments.extend(outcome.payments);
            report
                .errors
                .extend(outcome.errors.into_iter().map(|e| format!("email {}: {e}", email.id)));
            if tables_read == 0 {
                log::warn!("Nothing readable in the downloads of email {}, leaving it pending", email.id);
                continue;
            }

            if let Err(e) = mail.mark_as_read(email.id) {
                log::error!("Failed to mark email {} as read: {e}", email.id);
                report.errors.push(format!("email {}: mark as read: {e}", email.id));
            }
            if let Err(e) = self.ledger.mark_as_processed(email.id) {
                log::error!("Error saving processed emails: {e}");
                report.errors.push(format!("email {}: ledger: {e}", email.id));
            }
        }

        report.payments_found = all_payments.len();
        if all_payments.is_empty() {
            log::info!("No payments found to send");
            report.webhook_sent = true;
        } else {
            let batch = self.send_payments(&all_payments);
            report.webhook_sent = batch.success;
            if !batch.success {
                report.errors.push(format!(
                    "Failed to send webhook: {} of {} batches failed",
                    batch.failed_batches,
                    batch.batches_sent + batch.failed_batches
                ));
            }
        }

        self.cleanup();
        report.success = report.errors.is_empty();
        log::info!(
            "Processing completed: {} emails, {} files, {} payments, {} errors",
            report.emails_processed,
            report.files_downloaded,
            report.payments_found,
            report.errors.len()
        );
        report
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.ledger.cleanup_old_entries(self.keep_last_n) {
            log::warn!("Error pruning processed emails: {e}");
        }
        if let Err(e) = cleanup_old_downloads(&self.download_folder, self.keep_recent_downloads) {
            log::warn!("Error during download cleanup: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::EmailDownloads;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeMail {
        emails: Vec<EmailDownloads>,
        read: Vec<u64>,
    }

    impl MailSource for FakeMail {
        fn fetch_pending(&mut self, ledger: &EmailLedger, limit: usize) -> Result<Vec<EmailDownloads>> {
            Ok(self
                .emails
                .iter()
                .filter(|e| !ledger.is_processed(e.id))
                .take(limit)
                .cloned()
                .collect())
        }

        fn mark_as_read(&mut self, id: u64) -> Result<()> {
            self.read.push(id);
            Ok(())
        }
    }

    struct FakeDownloader {
        files: HashMap<String, PathBuf>,
    }

    impl Downloader for FakeDownloader {
        fn download(&mut self, url: &str) -> Result<PathBuf> {
            self.files
                .get(url)
                .cloned()
                .ok_or_else(|| PayrelayError::Download(url.to_string()))
        }
    }

    struct FakeArchives {
        dir: PathBuf,
    }

    impl ArchiveExtractor for FakeArchives {
        fn extract(&self, _archive: &Path) -> Result<PathBuf> {
            Ok(self.dir.clone())
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        bodies: RefCell<Vec<Value>>,
        fail: bool,
    }

    impl Transport for FakeTransport {
        fn post(&self, body: &Value) -> Result<()> {
            self.bodies.borrow_mut().push(body.clone());
            if self.fail {
                Err(PayrelayError::Delivery("status 503".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn settings(dir: &Path) -> Settings {
        let mut s = Settings::default();
        s.ledger.path = dir.join("logs").join("processed.json").display().to_string();
        s.processing.download_folder = dir.join("downloads").display().to_string();
        s
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const STATEMENT: &str = "amount;date;transaction_id;customer_id;status\n\
        1 000;2025-01-15;Счёт №2497 оплата;77;pending\n\
        250.50;2025-01-16;C_516913;78;completed\n\
        ;2025-01-17;REF123456;79;pending\n\
        €100;2025-01-18;оплата 8000 руб;80;pending\n";

    #[test]
    fn test_process_files_filters_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write(dir.path(), "stmt.csv", STATEMENT);
        let pipeline = Pipeline::new(&settings(dir.path()), FakeTransport::default());
        let outcome = pipeline.process_files(&[csv], None);
        // completed row is excluded, empty amount and "1 000" are rejected
        assert_eq!(outcome.payments.len(), 1);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.payments[0].transaction_id, "оплата 8");
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_bad_file_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write(dir.path(), "bad.csv", "a;b\n1;2;3\n4,5,6,7\n");
        let good = write(dir.path(), "good.csv", "amount;transaction_id\n10;C_516913\n");
        let pdf = write(dir.path(), "scan.pdf", "%PDF");
        let zip = write(dir.path(), "stmt.zip", "PK");
        let pipeline = Pipeline::new(&settings(dir.path()), FakeTransport::default());
        let outcome = pipeline.process_files(&[bad, good, pdf, zip], None);
        assert_eq!(outcome.payments.len(), 1);
        assert_eq!(outcome.errors.len(), 3);
    }

    #[test]
    fn test_archives_go_through_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let unpacked = dir.path().join("unpacked").join("nested");
        std::fs::create_dir_all(&unpacked).unwrap();
        write(&unpacked, "a.csv", "amount;transaction_id\n10;C_516913\n");
        write(&unpacked, "b.csv", "amount;transaction_id\n$20;REF123456\n");
        let zip = write(dir.path(), "stmt.zip", "PK");
        let archives = FakeArchives {
            dir: dir.path().join("unpacked"),
        };
        let pipeline = Pipeline::new(&settings(dir.path()), FakeTransport::default());
        let outcome = pipeline.process_files(&[zip], Some(&archives));
        assert_eq!(outcome.payments.len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_run_marks_emails_and_sends() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write(dir.path(), "stmt.csv", STATEMENT);
        let mut mail = FakeMail {
            emails: vec![
                EmailDownloads { id: 11, links: vec!["https://bank/s.csv".to_string()] },
                EmailDownloads { id: 12, links: vec!["https://bank/missing.zip".to_string()] },
            ],
            read: Vec::new(),
        };
        let mut downloader = FakeDownloader {
            files: [("https://bank/s.csv".to_string(), csv)].into_iter().collect(),
        };
        let transport = FakeTransport::default();
        let mut pipeline = Pipeline::new(&settings(dir.path()), &transport);

        let report = pipeline.run(&mut mail, &mut downloader, None);
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.emails_processed, 2);
        assert_eq!(report.files_downloaded, 1);
        assert_eq!(report.payments_found, 1);
        assert!(report.webhook_sent);
        // email 12 downloaded nothing, so it stays pending
        assert_eq!(mail.read, vec![11]);
        assert!(pipeline.ledger().is_processed(11));
        assert!(!pipeline.ledger().is_processed(12));
        assert_eq!(transport.bodies.borrow().len(), 1);

        // second pass skips the handled email
        let again = pipeline.run(&mut mail, &mut downloader, None);
        assert_eq!(again.emails_processed, 1);
        assert_eq!(again.payments_found, 0);
    }

    #[test]
    fn test_run_reports_delivery_failure() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write(dir.path(), "stmt.csv", "amount;transaction_id\n10;C_516913\n");
        let mut mail = FakeMail {
            emails: vec![EmailDownloads { id: 5, links: vec!["u".to_string()] }],
            read: Vec::new(),
        };
        let mut downloader = FakeDownloader {
            files: [("u".to_string(), csv)].into_iter().collect(),
        };
        let transport = FakeTransport {
            fail: true,
            ..FakeTransport::default()
        };
        let mut pipeline = Pipeline::new(&settings(dir.path()), &transport);
        let report = pipeline.run(&mut mail, &mut downloader, None);
        assert!(!report.success);
        assert!(!report.webhook_sent);
        assert_eq!(report.errors.len(), 1);
        assert!(pipeline.ledger().is_processed(5));
    }

    #[test]
    fn test_run_with_empty_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let mut mail = FakeMail { emails: Vec::new(), read: Vec::new() };
        let mut downloader = FakeDownloader { files: HashMap::new() };
        let mut pipeline = Pipeline::new(&settings(dir.path()), FakeTransport::default());
        let report = pipeline.run(&mut mail, &mut downloader, None);
        assert!(report.success);
        assert_eq!(report.emails_processed, 0);
    }

    #[test]
    fn test_run_unpacks_zip_downloads() {
        use crate::download::ZipExtractor;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("statement.zip");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        writer
            .start_file("2025/jan.csv", zip::write::FileOptions::default())
            .unwrap();
        writer
            .write_all("amount;transaction_id\n10;C_516913\n$20;REF123456\n".as_bytes())
            .unwrap();
        writer.finish().unwrap();

        let settings = settings(dir.path());
        let mut mail = FakeMail {
            emails: vec![EmailDownloads { id: 7, links: vec!["https://bank/s.zip".to_string()] }],
            read: Vec::new(),
        };
        let mut downloader = FakeDownloader {
            files: [("https://bank/s.zip".to_string(), archive)].into_iter().collect(),
        };
        let archives = ZipExtractor::new(Path::new(&settings.processing.download_folder));
        let transport = FakeTransport::default();
        let mut pipeline = Pipeline::new(&settings, &transport);

        let report = pipeline.run(&mut mail, &mut downloader, Some(&archives));
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.payments_found, 2);
        assert!(pipeline.ledger().is_processed(7));
        let body = &transport.bodies.borrow()[0];
        assert_eq!(body["data"]["payments_count"], 2);
    }

    #[test]
    fn test_unreadable_downloads_leave_email_pending() {
        let dir = tempfile::tempdir().unwrap();
        let page = write(dir.path(), "download.php", "<html>login</html>");
        let mut mail = FakeMail {
            emails: vec![EmailDownloads { id: 3, links: vec!["u".to_string()] }],
            read: Vec::new(),
        };
        let mut downloader = FakeDownloader {
            files: [("u".to_string(), page)].into_iter().collect(),
        };
        let mut pipeline = Pipeline::new(&settings(dir.path()), FakeTransport::default());
        let report = pipeline.run(&mut mail, &mut downloader, None);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(mail.read.is_empty());
        assert!(!pipeline.ledger().is_processed(3));
    }
}
