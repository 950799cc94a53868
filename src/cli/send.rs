use std::path::{Path, PathBuf};

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::download::ZipExtractor;
use crate::error::{PayrelayError, Result};
use crate::pipeline::Pipeline;
use crate::settings::Settings;
use crate::webhook::{BatchReport, HttpTransport};

fn print_batch_report(report: &BatchReport) {
    let mut table = Table::new();
    table.set_header(vec!["Payments", "Batches sent", "Batches failed", "Success rate"]);
    table.add_row(vec![
        Cell::new(report.total),
        Cell::new(report.batches_sent),
        Cell::new(report.failed_batches),
        Cell::new(format!("{:.0}%", report.success_rate * 100.0)),
    ]);
    println!("{table}");
}

pub fn run(settings: &Settings, paths: &[PathBuf]) -> Result<()> {
    settings.require_webhook()?;
    let transport = HttpTransport::new(&settings.webhook)?;
    let pipeline = Pipeline::new(settings, transport);

    let archives = ZipExtractor::new(Path::new(&settings.processing.download_folder));
    let outcome = pipeline.process_files(paths, Some(&archives));
    for e in &outcome.errors {
        eprintln!("{} {e}", "skipped:".yellow());
    }
    println!(
        "{} payments accepted, {} rejected",
        outcome.payments.len(),
        outcome.rejected
    );
    if outcome.payments.is_empty() {
        println!("Nothing to send.");
        return Ok(());
    }

    let report = pipeline.send_payments(&outcome.payments);
    print_batch_report(&report);
    if report.success {
        println!("{}", "All batches delivered.".green());
        Ok(())
    } else {
        Err(PayrelayError::Delivery(format!(
            "{} of {} batches failed",
            report.failed_batches,
            report.batches_sent + report.failed_batches
        )))
    }
}
