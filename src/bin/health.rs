use std::env;

use anyhow::{bail, Result};
use reqwest::Url;

const DEFAULT_URL: &str = "http://127.0.0.1:25566/health";

/// Container health check: exits non-zero unless the URL answers with a success status.
fn main() -> Result<()> {
    let url = env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let url = Url::parse(&url)?;

    let response = reqwest::blocking::get(url.clone())?;
    if !response.status().is_success() {
        bail!("Health check against {} failed with {}", url, response.status());
    }

    Ok(())
}
