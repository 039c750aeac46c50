use std::sync::OnceLock;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::Result;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("et-EE,et;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers
}

/// Build the client shared by metadata lookups and downloads for one run.
///
/// Only connect and read timeouts are set here: a whole-request timeout would
/// cut off long downloads, so metadata calls apply their own per request.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    install_rustls_provider();

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(default_headers())
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .build()?;
    Ok(client)
}
