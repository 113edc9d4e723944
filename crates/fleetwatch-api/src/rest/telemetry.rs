// Telemetry endpoints
//
// Samples are append-only; readers want either everything (fleet join)
// or the newest sample for one device key.

use tracing::debug;

use crate::error::Error;
use crate::rest::client::RestClient;
use crate::rest::models::TelemetryRow;

impl RestClient {
    /// List every telemetry sample, newest first.
    ///
    /// `GET /rest/v1/{telemetry}?select=*&order=created_at.desc&limit={n}&offset={k}`
    ///
    /// The server caps each response at its `max-rows`, so pages are
    /// requested until one comes back short. Newest-first order means a
    /// row inserted mid-listing only shifts older rows into the next page.
    pub async fn list_telemetry(&self) -> Result<Vec<TelemetryRow>, Error> {
        let page_size = self.page_size().get();
        let mut rows: Vec<TelemetryRow> = Vec::new();
        loop {
            let url = self.table_url(
                &self.tables().telemetry,
                &[
                    ("order", "created_at.desc".into()),
                    ("limit", page_size.to_string()),
                    ("offset", rows.len().to_string()),
                ],
            )?;
            let page: Vec<TelemetryRow> = self.get_rows(url).await?;
            let last = page.len() < page_size;
            rows.extend(page);
            if last {
                break;
            }
        }
        debug!(rows = rows.len(), "listed telemetry");
        Ok(rows)
    }

    /// Newest sample for a device key, or `None` if the device never reported.
    ///
    /// `GET /rest/v1/{telemetry}?select=*&device_key=eq.{key}&order=created_at.desc&limit=1`
    pub async fn latest_telemetry(&self, device_key: &str) -> Result<Option<TelemetryRow>, Error> {
        let url = self.table_url(
            &self.tables().telemetry,
            &[
                ("device_key", format!("eq.{device_key}")),
                ("order", "created_at.desc".into()),
                ("limit", "1".into()),
            ],
        )?;
        debug!(device_key, "fetching latest telemetry");
        let rows: Vec<TelemetryRow> = self.get_rows(url).await?;
        Ok(rows.into_iter().next())
    }
}
