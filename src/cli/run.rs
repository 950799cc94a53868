use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::download::{HttpDownloader, ZipExtractor};
use crate::error::{PayrelayError, Result};
use crate::inbox::LocalInbox;
use crate::pipeline::{Pipeline, RunReport};
use crate::settings::Settings;
use crate::webhook::HttpTransport;

fn print_run_report(report: &RunReport) {
    let mut table = Table::new();
    table.set_header(vec!["Emails", "Files", "Payments", "Webhook"]);
    table.add_row(vec![
        Cell::new(report.emails_processed),
        Cell::new(report.files_downloaded),
        Cell::new(report.payments_found),
        Cell::new(if report.webhook_sent { "sent".green() } else { "failed".red() }),
    ]);
    println!("{table}");
    for e in &report.errors {
        println!("  {} {e}", "error:".red());
    }
}

pub fn run(settings: &Settings) -> Result<()> {
    settings.require_webhook()?;
    let transport = HttpTransport::new(&settings.webhook)?;
    let mut pipeline = Pipeline::new(settings, transport);
    let mut inbox = LocalInbox::new(Path::new(&settings.inbox.dir));
    let download_folder = Path::new(&settings.processing.download_folder);
    let mut downloader = HttpDownloader::new(download_folder, settings.webhook.timeout_secs)?;
    let archives = ZipExtractor::new(download_folder);

    let report = pipeline.run(&mut inbox, &mut downloader, Some(&archives));
    print_run_report(&report);
    println!("Ledger now holds {} processed emails", pipeline.ledger().len());
    if report.success {
        Ok(())
    } else {
        Err(PayrelayError::Other(format!(
            "run finished with {} errors",
            report.errors.len()
        )))
    }
}
