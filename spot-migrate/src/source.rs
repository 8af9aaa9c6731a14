//! Source query service access.
//!
//! [`QueryClient`] is the narrow seam to the time-series database: one call
//! returns one page of results plus the token for the next page.
//! [`run_query`] drives the pagination and feeds every page to the codec.
//!
//! Failures are not retried. Any error while fetching or decoding a page is
//! logged and ends the query early; the caller gets whatever was decoded
//! before the failure, which may be nothing.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::codec::{decode_page, QueryPage, ResultBuilder};
use crate::config::SourceConfig;
use crate::error::{MigrationError, Result};

/// One page at a time access to a query service.
#[async_trait]
pub trait QueryClient: Debug + Send + Sync {
    /// Fetches the page identified by `next_token`, or the first page.
    async fn query_page(&self, query: &str, next_token: Option<&str>) -> Result<QueryPage>;

    /// Returns a human-readable description of this client.
    fn description(&self) -> String;
}

/// Builder for queries against the spot-pricing table.
#[derive(Debug, Clone)]
pub struct SpotQuery {
    database: String,
    table: String,
}

impl SpotQuery {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.database, &config.table)
    }

    /// Every row with `start <= time <= end`, ordered by time.
    pub fn between(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
        format!(
            r#"SELECT * FROM "{}"."{}" WHERE time between from_iso8601_timestamp('{}') and from_iso8601_timestamp('{}') ORDER BY time"#,
            self.database,
            self.table,
            iso(start),
            iso(end)
        )
    }
}

fn iso(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// What a query run produced.
#[derive(Debug)]
pub struct QueryRun {
    /// Everything decoded before the run ended
    pub builder: ResultBuilder,
    /// Pages fetched and decoded
    pub pages: usize,
    /// The error that ended the run early, if any
    pub failure: Option<MigrationError>,
}

impl QueryRun {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs `query` to completion, decoding every page into `builder`.
///
/// Never fails: a page that cannot be fetched or decoded is logged, and the
/// run returns the rows decoded so far together with the failure.
#[instrument(skip(client, query, builder), fields(client = %client.description()))]
pub async fn run_query<C>(client: &C, query: &str, mut builder: ResultBuilder) -> QueryRun
where
    C: QueryClient + ?Sized,
{
    info!(query = %query, "Starting query");
    let mut next_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = match client.query_page(query, next_token.as_deref()).await {
            Ok(page) => page,
            Err(e) => return abandoned(builder, pages, e),
        };

        // Decode into a scratch builder so a bad page cannot leave
        // half a row behind.
        match decode_page(builder.empty_like(), &page) {
            Ok(decoded) => builder.absorb(decoded),
            Err(e) => return abandoned(builder, pages, e),
        }
        pages += 1;

        if let Some(status) = &page.query_status {
            debug!(
                page = pages,
                progress = ?status.progress_percentage,
                bytes_scanned = ?status.cumulative_bytes_scanned,
                "Query progress"
            );
        }

        match page.next_token {
            Some(token) if next_token.as_deref() == Some(token.as_str()) => {
                let e = MigrationError::data_source(
                    "query",
                    format!("service returned the same page token twice: {token}"),
                );
                return abandoned(builder, pages, e);
            }
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    info!(pages, rows = builder.rows_decoded(), "Query finished");
    QueryRun {
        builder,
        pages,
        failure: None,
    }
}

fn abandoned(builder: ResultBuilder, pages: usize, error: MigrationError) -> QueryRun {
    warn!(
        error = %error,
        pages,
        rows = builder.rows_decoded(),
        "Exception while running query; keeping partial result"
    );
    QueryRun {
        builder,
        pages,
        failure: Some(error),
    }
}

/// Replays result pages exported as JSON files.
///
/// Pages are the `*.json` files of a directory in file-name order; the page
/// token is the index of the next file. The query text is not interpreted.
#[derive(Debug, Clone)]
pub struct JsonPageClient {
    dir: PathBuf,
    pages: Vec<PathBuf>,
}

impl JsonPageClient {
    /// Lists the pages under `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            MigrationError::data_source_with_source(
                "pages",
                format!("cannot list {}", dir.display()),
                Box::new(e),
            )
        })?;

        let mut pages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                pages.push(path);
            }
        }
        pages.sort();
        debug!(dir = %dir.display(), pages = pages.len(), "Found exported pages");
        Ok(Self { dir, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
impl QueryClient for JsonPageClient {
    async fn query_page(&self, _query: &str, next_token: Option<&str>) -> Result<QueryPage> {
        let index = match next_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                MigrationError::data_source("pages", format!("invalid page token '{token}'"))
            })?,
        };
        let Some(path) = self.pages.get(index) else {
            // An empty export is an empty result, not an error.
            if index == 0 {
                return Ok(QueryPage::default());
            }
            return Err(MigrationError::data_source(
                "pages",
                format!("page {index} does not exist"),
            ));
        };

        let text = fs::read_to_string(path).await.map_err(|e| {
            MigrationError::data_source_with_source(
                "pages",
                format!("cannot read {}", path.display()),
                Box::new(e),
            )
        })?;
        let mut page: QueryPage = serde_json::from_str(&text).map_err(|e| {
            MigrationError::data_source_with_source(
                "pages",
                format!("malformed page {}", path.display()),
                Box::new(e),
            )
        })?;
        page.next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(page)
    }

    fn description(&self) -> String {
        format!("JSON pages: {} ({} files)", self.dir.display(), self.pages.len())
    }
}

/// Serves pages held in memory, optionally failing at a given page.
#[derive(Debug, Clone, Default)]
pub struct StaticPageClient {
    pages: Vec<QueryPage>,
    fail_at: Option<usize>,
}

impl StaticPageClient {
    pub fn new(pages: Vec<QueryPage>) -> Self {
        Self {
            pages,
            fail_at: None,
        }
    }

    /// Makes the request for page `index` fail.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

#[async_trait]
impl QueryClient for StaticPageClient {
    async fn query_page(&self, _query: &str, next_token: Option<&str>) -> Result<QueryPage> {
        let index = next_token.map_or(Ok(0), |t| {
            t.parse::<usize>()
                .map_err(|_| MigrationError::data_source("static", format!("invalid token '{t}'")))
        })?;
        if self.fail_at == Some(index) {
            return Err(MigrationError::data_source(
                "static",
                format!("page {index} unavailable"),
            ));
        }
        let mut page = self.pages.get(index).cloned().unwrap_or_default();
        page.next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(page)
    }

    fn description(&self) -> String {
        format!("static pages: {}", self.pages.len())
    }
}
