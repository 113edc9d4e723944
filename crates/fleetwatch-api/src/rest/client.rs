// PostgREST HTTP client
//
// Wraps `reqwest::Client` with table-scoped URL construction, schema
// profile headers, and PostgREST error-body decoding. Endpoint methods
// (devices, telemetry) live in sibling files as inherent methods so this
// module stays focused on transport mechanics.

use std::num::NonZeroUsize;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// PostgREST error envelope: `{"code", "message", "details", "hint"}`.
#[derive(Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    #[allow(dead_code)]
    details: Option<String>,
    hint: Option<String>,
}

/// Where the two record sets live in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    /// Postgres schema exposed through PostgREST.
    pub schema: String,
    /// Device registry table.
    pub devices: String,
    /// Telemetry sample table.
    pub telemetry: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            schema: "public".into(),
            devices: "devices".into(),
            telemetry: "device_statistics".into(),
        }
    }
}

/// Rows requested per page when listing telemetry. Matches the
/// PostgREST `max-rows` default of hosted projects.
pub const DEFAULT_PAGE_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => panic!("page size must be non-zero"),
};

/// Raw HTTP client for the backend's PostgREST interface.
///
/// All methods return decoded rows; filtering and ordering are pushed
/// down to the server as PostgREST query operators (`eq.`, `order=`).
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    tables: TableNames,
    page_size: NonZeroUsize,
}

impl RestClient {
    /// Create a client from a project URL (e.g. `https://abc.supabase.co`).
    ///
    /// The API key is attached to every request by the transport.
    pub fn new(
        project_url: &Url,
        api_key: &SecretString,
        tables: TableNames,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(api_key)?;
        Ok(Self {
            http,
            base_url: rest_base(project_url)?,
            tables,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    ///
    /// Use this when headers are already configured (tests, custom proxies).
    pub fn with_client(
        http: reqwest::Client,
        project_url: &Url,
        tables: TableNames,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: rest_base(project_url)?,
            tables,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// The PostgREST root (`{project}/rest/v1/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Page size for paged listings. Must not exceed the server's
    /// `max-rows`, or a capped page is mistaken for the last one.
    pub fn with_page_size(mut self, page_size: NonZeroUsize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_size(&self) -> NonZeroUsize {
        self.page_size
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/{table}?select=*&...` with the given query operators.
    pub(crate) fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url, Error> {
        let mut url = self.base_url.join(table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and decode the JSON array of rows.
    pub(crate) async fn get_rows<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, Error> {
        debug!("GET {}", url);

        let mut builder = self.http.get(url);
        if self.tables.schema != "public" {
            builder = builder.header("Accept-Profile", &self.tables.schema);
        }
        let resp = builder.send().await.map_err(Error::Transport)?;

        self.parse_rows(resp).await
    }

    /// Decode a PostgREST response, mapping error bodies to [`Error::Rest`].
    async fn parse_rows<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<Vec<T>, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let message = serde_json::from_str::<PostgrestError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "API key rejected".into());
            return Err(Error::Authentication { message });
        }

        if !status.is_success() {
            return Err(match serde_json::from_str::<PostgrestError>(&body) {
                Ok(err) => Error::Rest {
                    status: status.as_u16(),
                    code: err.code,
                    message: err.message.unwrap_or_else(|| format!("HTTP {status}")),
                    hint: err.hint,
                },
                Err(_) => Error::Rest {
                    status: status.as_u16(),
                    code: None,
                    message: format!("HTTP {status}: {}", preview(&body)),
                    hint: None,
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body: body.clone(),
        })
    }
}

fn rest_base(project_url: &Url) -> Result<Url, Error> {
    let root = project_url.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{root}/rest/v1/"))?)
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
