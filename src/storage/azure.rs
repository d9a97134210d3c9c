//! Azure Blob Storage backend.
//!
//! Talks to the Blob REST API directly with a shared access signature, so no
//! account key ever reaches this process.

use super::{BlobStore, Container};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2021-08-06";

pub struct AzureBlobStore {
    client: reqwest::Client,
    account_url: Url,
    sas_token: String,
}

impl AzureBlobStore {
    /// Create a store for `account_url` (e.g. `https://acct.blob.core.windows.net`).
    ///
    /// `sas_token` may be given with or without its leading `?`.
    pub fn new(account_url: &str, sas_token: &str) -> Result<Self> {
        let account_url = Url::parse(account_url).map_err(|e| {
            AppError::Configuration(format!("Invalid Azure account URL '{}': {}", account_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Storage(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            account_url,
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    fn blob_url(&self, container: Container, name: &str) -> Result<Url> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Configuration("Azure account URL cannot be a base".into()))?
            .pop_if_empty()
            .push(container.name())
            .push(name);
        url.set_query(Some(&self.sas_token));
        Ok(url)
    }

    fn list_url(&self, container: Container, marker: Option<&str>) -> Result<Url> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Configuration("Azure account URL cannot be a base".into()))?
            .pop_if_empty()
            .push(container.name());
        url.set_query(Some(&format!(
            "restype=container&comp=list&{}",
            self.sas_token
        )));
        if let Some(marker) = marker {
            url.query_pairs_mut().append_pair("marker", marker);
        }
        Ok(url)
    }
}

fn storage_error(action: &str, e: reqwest::Error) -> AppError {
    AppError::Storage(format!("Azure {} failed: {}", action, e))
}

/// Pull the text of every `<tag>...</tag>` element out of an XML document.
fn xml_elements(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(unescape_xml(&after[..end]));
        rest = &after[end + close.len()..];
    }

    values
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn backend_name(&self) -> &'static str {
        "azure"
    }

    async fn download(&self, container: Container, name: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.blob_url(container, name)?)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| storage_error("download", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{}/{}", container, name))),
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| storage_error("download", e))?
                .to_vec()),
            status => Err(AppError::Storage(format!(
                "Azure download of {}/{} returned {}",
                container, name, status
            ))),
        }
    }

    async fn upload(&self, container: Container, name: &str, data: Vec<u8>) -> Result<()> {
        let size = data.len();
        let response = self
            .client
            .put(self.blob_url(container, name)?)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .body(data)
            .send()
            .await
            .map_err(|e| storage_error("upload", e))?;

        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "Azure upload of {}/{} returned {}",
                container,
                name,
                response.status()
            )));
        }

        debug!(container = %container, name, bytes = size, "Uploaded blob to Azure");
        Ok(())
    }

    async fn list(&self, container: Container) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .client
                .get(self.list_url(container, marker.as_deref())?)
                .header("x-ms-version", API_VERSION)
                .send()
                .await
                .map_err(|e| storage_error("list", e))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(AppError::Storage(format!(
                    "Azure list of {} returned {}",
                    container,
                    response.status()
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| storage_error("list", e))?;
            names.extend(xml_elements(&body, "Name"));

            match xml_elements(&body, "NextMarker").into_iter().next() {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, container: Container, name: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.blob_url(container, name)?)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| storage_error("delete", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(AppError::Storage(format!(
                "Azure delete of {}/{} returned {}",
                container, name, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url_encodes_name_and_appends_sas() {
        let store =
            AzureBlobStore::new("https://acct.blob.core.windows.net/", "?sv=2022&sig=abc").unwrap();
        let url = store
            .blob_url(Container::RawPdfs, "annual report.pdf")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/raw-pdfs/annual%20report.pdf?sv=2022&sig=abc"
        );
    }

    #[test]
    fn test_list_url_with_marker() {
        let store = AzureBlobStore::new("https://acct.blob.core.windows.net", "sig=abc").unwrap();
        let url = store
            .list_url(Container::ChunkedDicts, Some("page2"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/chunked-dicts?restype=container&comp=list&sig=abc&marker=page2"
        );
    }

    #[test]
    fn test_xml_elements() {
        let xml = "<EnumerationResults><Blobs><Blob><Name>a&amp;b.json</Name></Blob>\
                   <Blob><Name>c.json</Name></Blob></Blobs><NextMarker /></EnumerationResults>";
        assert_eq!(xml_elements(xml, "Name"), vec!["a&b.json", "c.json"]);
        assert!(xml_elements(xml, "NextMarker").is_empty());
    }

    #[test]
    fn test_invalid_account_url() {
        assert!(matches!(
            AzureBlobStore::new("not a url", "sig=1"),
            Err(AppError::Configuration(_))
        ));
    }
}
