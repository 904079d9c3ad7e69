//! Periodic publisher of synthetic readings.
//!
//! Stores one random reading per tick through the `createData` mutation so a
//! running view has live data to show.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use telemetry_core::error::TransportError;
use telemetry_core::models::DataPoint;
use telemetry_core::operations::{create_data, CREATE_FIELD};
use telemetry_transport::router::TransportRouter;
use tokio::task::JoinHandle;
use tokio::time;

/// Range random readings are drawn from.
const VALUE_RANGE: std::ops::Range<f64> = 5.0..100.0;

pub struct Publisher {
    router: TransportRouter,
    source_id: String,
    interval: Duration,
}

impl Publisher {
    pub fn new(router: TransportRouter, source_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            router,
            source_id: source_id.into(),
            interval,
        }
    }

    /// Store `point` and return the reading as the server recorded it.
    pub async fn publish_once(&self, point: &DataPoint) -> Result<DataPoint, TransportError> {
        let data = self.router.request(create_data(point)).await?;
        let stored = data
            .get(CREATE_FIELD)
            .cloned()
            .ok_or_else(|| TransportError::Decode(format!("response has no {CREATE_FIELD} field")))?;
        serde_json::from_value(stored).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Store a random reading stamped with the current time.
    pub async fn publish_random(&self) -> Result<DataPoint, TransportError> {
        let value = rand::thread_rng().gen_range(VALUE_RANGE);
        let point = DataPoint::new(Utc::now(), value, self.source_id.as_str());
        self.publish_once(&point).await
    }

    /// Publish on every tick until aborted. Failures are logged and the loop
    /// keeps going.
    pub fn start(self) -> PublisherHandle {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            tracing::info!(
                source_id = %self.source_id,
                interval_ms = self.interval.as_millis() as u64,
                "publisher started"
            );

            loop {
                ticker.tick().await;
                match self.publish_random().await {
                    Ok(point) => {
                        tracing::info!(timestamp = %point.timestamp, value = point.value, "published reading")
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to publish reading"),
                }
            }
        });

        PublisherHandle { handle }
    }
}

/// Handle to the background publishing task.
pub struct PublisherHandle {
    handle: JoinHandle<()>,
}

impl PublisherHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
