use colored::Colorize;

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::settings::Settings;
use crate::webhook::HttpTransport;

pub fn run(settings: &Settings) -> Result<()> {
    settings.require_webhook()?;
    let pipeline = Pipeline::new(settings, HttpTransport::new(&settings.webhook)?);
    println!("Testing webhook {}", settings.webhook.url);
    pipeline.test_connection()?;
    println!("{}", "Webhook connection OK".green());
    Ok(())
}
