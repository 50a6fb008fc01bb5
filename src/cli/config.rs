//! `conductor config`

use crate::host::{load_config, DEFAULT_CONFIG};
use anyhow::Result;
use std::path::Path;

pub fn run(config: Option<&Path>, defaults: bool) -> Result<()> {
    if defaults {
        print!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    let config = load_config(config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
