// ── Hosted Postgres backend ──
//
// Adapts the PostgREST client and the realtime socket to the core
// traits, converting wire rows into the domain model on the way in.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fleetwatch_api::realtime::{PostgresChanges, RealtimeClient, RealtimeConfig};
use fleetwatch_api::transport::{TlsMode, TransportConfig};
use fleetwatch_api::{RestClient, RowId, TableNames};

use super::{
    ChangeFeed, ChangeFilter, ChangeKind, ChangeNotice, RecordSet, Subscription, SubscriptionId,
    TelemetryStore,
};
use crate::config::{BackendConfig, TlsVerification};
use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceKey, TelemetrySample};

/// PostgREST reads plus (optionally) realtime change channels.
pub struct SupabaseBackend {
    rest: RestClient,
    realtime: Option<RealtimeClient>,
    tables: TableNames,
}

impl SupabaseBackend {
    /// Reads and change subscriptions. Spawns the realtime socket task,
    /// so this must run inside a tokio runtime.
    pub fn connect(config: &BackendConfig, cancel: CancellationToken) -> Result<Self, CoreError> {
        let mut backend = Self::rest_only(config)?;
        let realtime = RealtimeClient::connect(
            &config.url,
            &config.api_key,
            RealtimeConfig::default(),
            cancel,
        )?;
        backend.realtime = Some(realtime);
        Ok(backend)
    }

    /// Reads only. `subscribe` fails with [`CoreError::SubscriptionFailed`].
    pub fn rest_only(config: &BackendConfig) -> Result<Self, CoreError> {
        let tables = TableNames {
            schema: config.schema.clone(),
            devices: config.devices_table.clone(),
            telemetry: config.telemetry_table.clone(),
        };
        let transport = build_transport(config);
        let rest = RestClient::new(&config.url, &config.api_key, tables.clone(), &transport)?;
        Ok(Self {
            rest,
            realtime: None,
            tables,
        })
    }

    fn table_for(&self, record_set: RecordSet) -> &str {
        match record_set {
            RecordSet::Devices => &self.tables.devices,
            RecordSet::Telemetry => &self.tables.telemetry,
        }
    }
}

fn build_transport(config: &BackendConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.timeout,
    }
}

impl TelemetryStore for SupabaseBackend {
    async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        let rows = self.rest.list_devices().await?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, CoreError> {
        let row = self.rest.get_device(&RowId::from(id)).await?;
        Ok(row.map(Device::from))
    }

    async fn list_telemetry(&self) -> Result<Vec<TelemetrySample>, CoreError> {
        let rows = self.rest.list_telemetry().await?;
        Ok(rows.into_iter().map(TelemetrySample::from).collect())
    }

    async fn latest_telemetry(&self, key: &DeviceKey) -> Result<Option<TelemetrySample>, CoreError> {
        let row = self.rest.latest_telemetry(key.as_str()).await?;
        Ok(row.map(TelemetrySample::from))
    }
}

impl ChangeFeed for SupabaseBackend {
    async fn subscribe(&self, record_set: RecordSet, filter: ChangeFilter) -> Result<Subscription, CoreError> {
        let Some(realtime) = &self.realtime else {
            return Err(CoreError::SubscriptionFailed {
                record_set: record_set.to_string(),
                reason: "realtime is not enabled for this backend".into(),
            });
        };

        let mut changes = PostgresChanges::all(&self.tables.schema, self.table_for(record_set));
        if let Some(filter) = filter.to_postgrest() {
            changes = changes.with_filter(filter);
        }

        let channel = realtime.join(changes).await.map_err(|e| CoreError::SubscriptionFailed {
            record_set: record_set.to_string(),
            reason: e.to_string(),
        })?;
        let id = SubscriptionId::new(channel.topic());
        debug!(%record_set, subscription = %id, "change subscription established");

        let changes = channel
            .into_stream()
            .map(move |event| ChangeNotice {
                record_set,
                kind: ChangeKind::from(event.change_type),
            })
            .boxed();

        Ok(Subscription { id, changes })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), CoreError> {
        match &self.realtime {
            Some(realtime) => realtime.leave(id.as_str()).map_err(CoreError::from),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use url::Url;

    fn config() -> BackendConfig {
        BackendConfig::new(
            Url::parse("https://abc.example.co").unwrap(),
            SecretString::from("anon-key".to_string()),
        )
    }

    #[tokio::test]
    async fn rest_only_backend_refuses_subscriptions() {
        let backend = SupabaseBackend::rest_only(&config()).unwrap();
        let err = backend
            .subscribe(RecordSet::Devices, ChangeFilter::All)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SubscriptionFailed { .. }));
        // nothing to release
        backend.unsubscribe(SubscriptionId::new("x")).await.unwrap();
    }

    #[test]
    fn custom_tables_are_used() {
        let mut cfg = config();
        cfg.telemetry_table = "readings".into();
        let backend = SupabaseBackend::rest_only(&cfg).unwrap();
        assert_eq!(backend.table_for(RecordSet::Telemetry), "readings");
        assert_eq!(backend.table_for(RecordSet::Devices), "devices");
    }
}
