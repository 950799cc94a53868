use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::extractor::Extractor;
use crate::settings::Settings;
use crate::validator::is_valid;

pub fn run(settings: &Settings, file: &Path) -> Result<()> {
    let extractor = Extractor::new(&settings.processing);
    let candidates = extractor.extract_file(file)?;

    let mut table = Table::new();
    table.set_header(vec!["Transaction ID", "Amount", "Date", "Customer", "Valid"]);
    let mut valid = 0;
    for candidate in &candidates {
        let ok = is_valid(candidate);
        if ok {
            valid += 1;
        }
        table.add_row(vec![
            Cell::new(&candidate.transaction_id),
            Cell::new(&candidate.amount),
            Cell::new(&candidate.date),
            Cell::new(&candidate.customer_id),
            Cell::new(if ok { "yes".green() } else { "no".red() }),
        ]);
    }

    println!("{}\n{table}", file.display());
    println!(
        "{} candidates, {} valid, {} rejected",
        candidates.len(),
        valid,
        candidates.len() - valid
    );
    Ok(())
}
