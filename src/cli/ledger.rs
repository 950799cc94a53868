use std::path::Path;

use crate::error::Result;
use crate::ledger::EmailLedger;
use crate::settings::Settings;

fn open(settings: &Settings) -> EmailLedger {
    EmailLedger::load(Path::new(&settings.ledger.path))
}

pub fn status(settings: &Settings) -> Result<()> {
    let ledger = open(settings);
    println!("Ledger:     {}", ledger.path().display());
    println!("Processed:  {}", ledger.len());
    if ledger.is_empty() {
        println!("Id range:   (empty)");
    } else if let (Some(lo), Some(hi)) = (ledger.ids().next(), ledger.ids().last()) {
        println!("Id range:   {lo}..{hi}");
    }
    println!("Keep last:  {}", settings.ledger.keep_last_n);
    Ok(())
}

pub fn mark(settings: &Settings, id: u64) -> Result<()> {
    let mut ledger = open(settings);
    if ledger.is_processed(id) {
        println!("Email {id} was already marked as processed");
        return Ok(());
    }
    ledger.mark_as_processed(id)?;
    println!("Marked email {id} as processed");
    Ok(())
}

pub fn check(settings: &Settings, id: u64) -> Result<()> {
    if open(settings).is_processed(id) {
        println!("Email {id}: processed");
    } else {
        println!("Email {id}: not processed");
    }
    Ok(())
}

pub fn cleanup(settings: &Settings, keep: Option<usize>) -> Result<()> {
    let keep = keep.unwrap_or(settings.ledger.keep_last_n);
    let mut ledger = open(settings);
    let removed = ledger.cleanup_old_entries(keep)?;
    println!("Removed {removed} old ids, {} remain", ledger.len());
    Ok(())
}
