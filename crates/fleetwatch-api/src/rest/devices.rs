// Device registry endpoints

use tracing::debug;

use crate::error::Error;
use crate::rest::client::RestClient;
use crate::rest::models::{DeviceRow, RowId};

impl RestClient {
    /// List every registered device, in the server's natural order.
    ///
    /// `GET /rest/v1/{devices}?select=*`
    pub async fn list_devices(&self) -> Result<Vec<DeviceRow>, Error> {
        let url = self.table_url(&self.tables().devices, &[])?;
        debug!("listing devices");
        self.get_rows(url).await
    }

    /// Look up one device by primary id. Returns `None` if no row matches.
    ///
    /// `GET /rest/v1/{devices}?select=*&id=eq.{id}&limit=1`
    pub async fn get_device(&self, id: &RowId) -> Result<Option<DeviceRow>, Error> {
        let url = self.table_url(
            &self.tables().devices,
            &[("id", format!("eq.{id}")), ("limit", "1".into())],
        )?;
        debug!(%id, "fetching device");
        let rows: Vec<DeviceRow> = self.get_rows(url).await?;
        Ok(rows.into_iter().next())
    }
}
