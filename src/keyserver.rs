//! Key server client.
//!
//! Speaks the HTTP Keyserver Protocol (HKP): keys are fetched with
//! `GET /pks/lookup?op=get&options=mr&search=0x<KEYID>` and published with a
//! form-encoded `POST /pks/add`.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{PgpkitError, Result};

/// Default key server when none is configured
pub const DEFAULT_KEYSERVER_URL: &str = "https://keys.openpgp.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote key directory
pub trait KeyServer: Send + Sync {
    /// Armored public key block for `key_id`
    fn get(&self, key_id: u64) -> Result<String>;

    /// Publishes an armored public key block; returns whether the server accepted it
    fn add(&self, armored: &str) -> bool;
}

/// HKP client over blocking HTTP
#[derive(Debug, Clone)]
pub struct HkpKeyServer {
    client: Client,
    base_url: String,
}

impl HkpKeyServer {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PgpkitError::key_server(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn lookup_url(&self) -> String {
        format!("{}/pks/lookup", self.base_url)
    }

    fn add_url(&self) -> String {
        format!("{}/pks/add", self.base_url)
    }
}

impl KeyServer for HkpKeyServer {
    fn get(&self, key_id: u64) -> Result<String> {
        let search = format!("0x{:016X}", key_id);
        debug!(url = %self.lookup_url(), search = %search, "Fetching key");
        let response = self
            .client
            .get(self.lookup_url())
            .query(&[("op", "get"), ("options", "mr"), ("search", search.as_str())])
            .send()
            .map_err(|e| PgpkitError::key_server(format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(PgpkitError::key_server(format!("key {} not found", search)))
            }
            status => {
                return Err(PgpkitError::key_server(format!("server returned {}", status)))
            }
        }
        let body = response
            .text()
            .map_err(|e| PgpkitError::key_server(format!("invalid response: {}", e)))?;
        extract_key_block(&body)
            .map(str::to_string)
            .ok_or_else(|| PgpkitError::key_server("response holds no public key block"))
    }

    fn add(&self, armored: &str) -> bool {
        let result = self
            .client
            .post(self.add_url())
            .form(&[("keytext", armored)])
            .send();
        match result {
            Ok(response) if response.status().is_success() => {
                info!(url = %self.add_url(), "Uploaded key");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Key server rejected upload");
                false
            }
            Err(e) => {
                warn!(error = %e, "Key upload failed");
                false
            }
        }
    }
}

/// The armored public key block inside a (possibly HTML-wrapped) response
fn extract_key_block(body: &str) -> Option<&str> {
    const BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
    const END: &str = "-----END PGP PUBLIC KEY BLOCK-----";
    let start = body.find(BEGIN)?;
    let end = body[start..].find(END)? + start + END.len();
    Some(&body[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key_block() {
        let body = "<html><pre>\n-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nAAAA\n=abcd\n-----END PGP PUBLIC KEY BLOCK-----\n</pre></html>";
        let block = extract_key_block(body).unwrap();
        assert!(block.starts_with("-----BEGIN"));
        assert!(block.ends_with("KEY BLOCK-----"));
        assert!(extract_key_block("no key here").is_none());
    }

    #[test]
    fn test_urls() {
        let server = HkpKeyServer::new("http://keys.example.org/").unwrap();
        assert_eq!(server.base_url(), "http://keys.example.org");
        assert_eq!(server.lookup_url(), "http://keys.example.org/pks/lookup");
        assert_eq!(server.add_url(), "http://keys.example.org/pks/add");
    }
}
