//! Fetch functions - pull full source tables through the paginated API

use crate::migration::types::SourceRecord;
use anyhow::Result;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed page size the source API serves.
pub const PAGE_SIZE: u32 = 100;

/// Courtesy delay between successful page requests, to stay under the
/// rate limit proactively.
const PAGE_DELAY: Duration = Duration::from_millis(250);

/// Backoff used when a 429 arrives without a usable Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Fetch failures that abort a table's run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source API returned {status} for table {table}: {body}")]
    Http {
        status: StatusCode,
        table: String,
        body: String,
    },
    #[error("request to source API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bad source API URL: {0}")]
    BadUrl(String),
}

/// One page of records plus the continuation cursor, when more remain.
#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    records: Vec<SourceRecord>,
    offset: Option<String>,
}

/// A table as listed by the base metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TableInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TableList {
    #[serde(default)]
    tables: Vec<TableInfo>,
}

/// Bearer-authenticated client for the source API. Constructed once at
/// startup from config and passed into each stage - stages never read
/// ambient globals.
pub struct SourceClient {
    http: Client,
    api_base: Url,
}

impl SourceClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| anyhow::anyhow!("source API key contains invalid characters"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        let api_base = Url::parse(api_base)
            .map_err(|e| anyhow::anyhow!("bad SOURCE_API_URL {}: {}", api_base, e))?;

        Ok(Self { http, api_base })
    }

    /// Fetch every record of one table, following the continuation
    /// cursor until it is absent. Pages arrive in source order; ordering
    /// across the whole table is not stable between runs, so callers
    /// must key on record ids.
    pub async fn fetch_all_records(
        &self,
        base_id: &str,
        table_name: &str,
        view: Option<&str>,
    ) -> Result<Vec<SourceRecord>, FetchError> {
        info!("Fetching table {} from base {}", table_name, base_id);

        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .fetch_page(base_id, table_name, view, offset.as_deref())
                .await?;
            pages += 1;
            debug!(
                "Page {} of {}: {} records",
                pages,
                table_name,
                page.records.len()
            );
            records.extend(page.records);

            match page.offset {
                Some(next) => {
                    offset = Some(next);
                    tokio::time::sleep(PAGE_DELAY).await;
                }
                None => break,
            }
        }

        info!(
            "Fetched {} records from {} in {} pages",
            records.len(),
            table_name,
            pages
        );
        Ok(records)
    }

    /// Request one page. A 429 sleeps for the advertised Retry-After and
    /// retries the same page, unbounded; any other non-2xx aborts with
    /// the status, table name, and response body.
    async fn fetch_page(
        &self,
        base_id: &str,
        table_name: &str,
        view: Option<&str>,
        offset: Option<&str>,
    ) -> Result<RecordPage, FetchError> {
        let url = self.table_url(base_id, table_name)?;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(view) = view {
                request = request.query(&[("view", view)]);
            }
            if let Some(offset) = offset {
                request = request.query(&[("offset", offset)]);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(&response).unwrap_or(DEFAULT_RETRY_AFTER);
                warn!(
                    "Rate limited fetching {}, retrying in {}s",
                    table_name,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    status,
                    table: table_name.to_string(),
                    body,
                });
            }

            return Ok(response.json::<RecordPage>().await?);
        }
    }

    /// List the tables of a base via the metadata endpoint, for the
    /// bulk-import entry point.
    pub async fn list_tables(&self, base_id: &str) -> Result<Vec<TableInfo>, FetchError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::BadUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["v0", "meta", "bases", base_id, "tables"]);

        loop {
            let response = self.http.get(url.clone()).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(&response).unwrap_or(DEFAULT_RETRY_AFTER);
                warn!("Rate limited listing tables, retrying in {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    status,
                    table: "(meta/tables)".to_string(),
                    body,
                });
            }

            let list = response.json::<TableList>().await?;
            return Ok(list.tables);
        }
    }

    /// `{api_base}/v0/{base}/{table}` - the Url API percent-encodes the
    /// table name, which routinely contains spaces.
    fn table_url(&self, base_id: &str, table_name: &str) -> Result<Url, FetchError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::BadUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["v0", base_id, table_name]);
        Ok(url)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_page_deserialization() {
        let page: RecordPage = serde_json::from_str(
            r#"{
                "records": [
                    {"id": "rec1", "createdTime": "2024-01-15T08:30:00.000Z", "fields": {"Name": "Juan"}},
                    {"id": "rec2", "fields": {}}
                ],
                "offset": "itrNEXT/rec2"
            }"#,
        )
        .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, "rec1");
        assert_eq!(page.offset.as_deref(), Some("itrNEXT/rec2"));
    }

    #[test]
    fn test_record_page_last_page_has_no_offset() {
        let page: RecordPage = serde_json::from_str(r#"{"records": []}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(page.offset.is_none());
    }

    #[test]
    fn test_table_url_encodes_names() {
        let client = SourceClient::new("https://api.airtable.com", "key").unwrap();
        let url = client.table_url("appBASE", "Household Members").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appBASE/Household%20Members"
        );
    }

    #[tokio::test]
    #[ignore] // hits the real API; needs SOURCE_API_KEY and a base
    async fn test_fetch_all_records_live() {
        let key = std::env::var("SOURCE_API_KEY").unwrap();
        let base = std::env::var("SOURCE_BASE_ID").unwrap();
        let client = SourceClient::new("https://api.airtable.com", &key).unwrap();

        let records = client
            .fetch_all_records(&base, "Homeowners", None)
            .await
            .unwrap();
        assert!(!records.is_empty());
    }
}
