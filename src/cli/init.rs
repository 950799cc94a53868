use std::path::Path;

use crate::error::{PayrelayError, Result};
use crate::settings::{default_settings_path, save_settings, Settings};

pub fn run(config: Option<&Path>, force: bool) -> Result<()> {
    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(default_settings_path);
    if path.exists() && !force {
        return Err(PayrelayError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    save_settings(&Settings::default(), &path)?;
    println!("Wrote default settings to {}", path.display());
    println!("Set webhook.url (or WEBHOOK_URL) before running `payrelay send` or `payrelay run`.");
    Ok(())
}
