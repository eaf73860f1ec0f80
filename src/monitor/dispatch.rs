//! Alert dispatch destinations.

use std::time::Duration;

use async_trait::async_trait;

use super::rules::{Alert, AlertSeverity};
use super::MonitorError;

/// Deadline for one dispatch call.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Somewhere alerts go. Dispatch errors are logged and swallowed by the
/// monitor; a broken destination never blocks the others.
#[async_trait]
pub trait AlertDestination: Send + Sync {
    /// Destination name for logs.
    fn name(&self) -> &str;

    /// Deliver a batch of alerts.
    async fn dispatch(&self, alerts: &[Alert]) -> Result<(), MonitorError>;
}

/// One line per alert on stdout.
#[derive(Debug, Default)]
pub struct ConsoleDestination;

impl ConsoleDestination {
    /// Console destination.
    pub fn new() -> Self {
        Self
    }

    fn format_line(alert: &Alert) -> String {
        let prefix = match alert.severity {
            AlertSeverity::Critical => "🚨",
            _ => "⚠️",
        };
        format!("{prefix} [{}] {}: {}", alert.severity, alert.title, alert.message)
    }
}

#[async_trait]
impl AlertDestination for ConsoleDestination {
    fn name(&self) -> &str {
        "console"
    }

    async fn dispatch(&self, alerts: &[Alert]) -> Result<(), MonitorError> {
        for alert in alerts {
            println!("{}", Self::format_line(alert));
        }
        Ok(())
    }
}

/// HTTP POST of `{"alerts":[…]}` to a configured URL.
pub struct WebhookDestination {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookDestination {
    /// Webhook destination for a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a custom header sent with every POST.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl AlertDestination for WebhookDestination {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn dispatch(&self, alerts: &[Alert]) -> Result<(), MonitorError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(DISPATCH_TIMEOUT)
            .json(&serde_json::json!({ "alerts": alerts }));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::Dispatch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MonitorError::Dispatch(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// In-process callback invocation.
pub struct CallbackDestination {
    callback: Box<dyn Fn(&[Alert]) + Send + Sync>,
}

impl CallbackDestination {
    /// Destination that hands alerts to a function.
    pub fn new(callback: impl Fn(&[Alert]) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl AlertDestination for CallbackDestination {
    fn name(&self) -> &str {
        "callback"
    }

    async fn dispatch(&self, alerts: &[Alert]) -> Result<(), MonitorError> {
        (self.callback)(alerts);
        Ok(())
    }
}
