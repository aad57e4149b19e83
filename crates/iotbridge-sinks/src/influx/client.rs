//! InfluxDB 1.x HTTP sink.

use std::time::Duration;

use async_trait::async_trait;
use iotbridge_core::config::InfluxSection;
use iotbridge_core::{Point, PointSink, SinkError, SinkResult};
use tracing::{debug, info, warn};

use super::line_protocol::encode_point;

/// Connection settings for the InfluxDB HTTP API.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub base_url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl InfluxConfig {
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_section(section: &InfluxSection) -> Self {
        let mut config = Self::new(section.base_url(), section.database.clone());
        if !section.username.is_empty() {
            config.username = Some(section.username.clone());
            config.password = Some(section.password.clone());
        }
        config.timeout = Duration::from_millis(section.timeout_ms.max(1));
        config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Writes point batches to InfluxDB with line protocol.
pub struct InfluxSink {
    config: InfluxConfig,
    http_client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> SinkResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Connection(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }

    /// Check the server answers `/ping`.
    pub async fn ping(&self) -> SinkResult<()> {
        let response = self
            .http_client
            .get(self.config.url("/ping"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await
    }

    /// `CREATE DATABASE` is idempotent on the server side.
    pub async fn create_database(&self) -> SinkResult<()> {
        let query = format!(
            "CREATE DATABASE \"{}\"",
            self.config.database.replace('"', "\\\"")
        );
        let response = self
            .with_auth(self.http_client.post(self.config.url("/query")))
            .form(&[("q", query.as_str())])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await
    }

    /// Encode a batch, skipping points whose value has no line protocol form.
    ///
    /// Returns the body and the number of skipped points.
    pub fn encode_batch(batch: &[Point]) -> (String, usize) {
        let mut body = String::new();
        let mut skipped = 0;
        for point in batch {
            match encode_point(point) {
                Some(line) => {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&line);
                }
                None => {
                    skipped += 1;
                    debug!(
                        device_id = point.device_id(),
                        measurement = point.measurement_name(),
                        "Skipping point with non-finite value"
                    );
                }
            }
        }
        (body, skipped)
    }

    fn transport_error(&self, e: reqwest::Error) -> SinkError {
        if e.is_timeout() {
            SinkError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            SinkError::Connection(e.to_string())
        }
    }
}

async fn check_status(response: reqwest::Response) -> SinkResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PointSink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    /// Reachability is required; database creation is best effort.
    async fn ensure_schema(&self) -> SinkResult<()> {
        self.ping().await?;
        match self.create_database().await {
            Ok(()) => info!(database = %self.config.database, "InfluxDB database ready"),
            Err(e) => warn!(
                database = %self.config.database,
                "Failed to create InfluxDB database: {}",
                e
            ),
        }
        Ok(())
    }

    async fn write(&self, batch: &[Point]) -> SinkResult<()> {
        let (body, skipped) = Self::encode_batch(batch);
        if body.is_empty() {
            if batch.is_empty() {
                return Ok(());
            }
            return Err(SinkError::Serialization(format!(
                "all {} points have non-finite values",
                skipped
            )));
        }
        if skipped > 0 {
            warn!(
                skipped,
                points = batch.len(),
                "Skipping points with non-finite values"
            );
        }

        let response = self
            .with_auth(self.http_client.post(self.config.url("/write")))
            .query(&[
                ("db", self.config.database.as_str()),
                ("precision", "ms"),
            ])
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match check_status(response).await {
            Ok(()) => {
                debug!(points = batch.len(), "InfluxDB write accepted");
                Ok(())
            }
            Err(SinkError::Rejected { status: 400, body }) => {
                warn!("InfluxDB rejected batch as malformed: {}", body);
                Err(SinkError::Rejected { status: 400, body })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotbridge_core::PointValue;

    #[test]
    fn test_from_section() {
        let config = InfluxConfig::from_section(&InfluxSection::default());
        assert_eq!(config.base_url, "http://127.0.0.1:8086");
        assert_eq!(config.database, "thingsroot");
        assert_eq!(config.username.as_deref(), Some("root"));
        assert_eq!(config.url("/write"), "http://127.0.0.1:8086/write");
    }

    #[test]
    fn test_encode_batch_skips_non_finite() {
        let batch = vec![
            Point::new("a", "value", "d1", 1.0, PointValue::Float(1.5), 0),
            Point::new("a", "value", "d1", 2.0, PointValue::Float(f64::INFINITY), 0),
            Point::new("b", "value", "d1", 3.0, PointValue::Integer(2), 1),
        ];
        let (body, skipped) = InfluxSink::encode_batch(&batch);
        assert_eq!(
            body,
            "a,device=d1 value=1.5,quality=0i 1000\nb,device=d1 value=2i,quality=1i 3000"
        );
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_all_non_finite_batch_is_an_error() {
        // Nothing is sent, so no server is needed.
        let sink = InfluxSink::new(InfluxConfig::new("http://127.0.0.1:9", "db")).unwrap();
        let batch = vec![
            Point::new("a", "value", "d1", 1.0, PointValue::Float(f64::NAN), 0),
            Point::new("a", "value", "d1", 2.0, PointValue::Float(f64::NEG_INFINITY), 0),
        ];
        let err = sink.write(&batch).await.unwrap_err();
        assert!(matches!(err, SinkError::Serialization(ref msg) if msg.contains("all 2 points")));
        assert!(sink.write(&[]).await.is_ok());
    }
}
