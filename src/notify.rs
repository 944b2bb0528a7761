//! Slack webhook notification channel for pipeline results.
//!
//! Enabled only when `SLACK_WEBHOOK_URL` is set; disabled is silent. Delivery
//! failures are the caller's to log, never to propagate into the pipeline
//! exit code.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

/// Environment variable for the webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Pipeline lifecycle events worth a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Started {
        project: String,
        region: String,
        destroy: bool,
    },
    Succeeded {
        project: String,
        region: String,
        duration_secs: u64,
        destroy: bool,
    },
    NoChanges {
        project: String,
        region: String,
    },
    Failed {
        project: String,
        region: String,
        stage: String,
        error: String,
    },
}

impl PipelineEvent {
    fn title(&self) -> String {
        match self {
            Self::Started { destroy: false, .. } => "Deployment started".to_string(),
            Self::Started { destroy: true, .. } => "Destroy started".to_string(),
            Self::Succeeded { destroy: false, .. } => "Deployment succeeded".to_string(),
            Self::Succeeded { destroy: true, .. } => "Destroy succeeded".to_string(),
            Self::NoChanges { .. } => "No infrastructure changes".to_string(),
            Self::Failed { stage, .. } => format!("Pipeline failed at {stage}"),
        }
    }

    fn color(&self) -> &'static str {
        match self {
            Self::Started { .. } => "#3498db",
            Self::Succeeded { .. } | Self::NoChanges { .. } => "good",
            Self::Failed { .. } => "danger",
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Started {
                project, destroy, ..
            } => {
                let verb = if *destroy { "destroy" } else { "deployment" };
                format!("Running {verb} pipeline for `{project}`")
            }
            Self::Succeeded {
                project,
                duration_secs,
                destroy,
                ..
            } => {
                let verb = if *destroy { "destroyed" } else { "deployed" };
                format!(
                    "`{project}` {verb} in {}",
                    format_duration(*duration_secs)
                )
            }
            Self::NoChanges { project, .. } => {
                format!("Plan for `{project}` found nothing to change; apply skipped")
            }
            Self::Failed { project, error, .. } => {
                format!("`{project}` pipeline aborted\n*Error:* {error}")
            }
        }
    }

    fn fields(&self) -> Vec<(String, String)> {
        let mut fields = match self {
            Self::Started {
                project, region, ..
            }
            | Self::Succeeded {
                project, region, ..
            }
            | Self::NoChanges { project, region }
            | Self::Failed {
                project, region, ..
            } => vec![
                ("Project".to_string(), project.clone()),
                ("Region".to_string(), region.clone()),
            ],
        };

        match self {
            Self::Succeeded { duration_secs, .. } => {
                fields.push(("Duration".to_string(), format_duration(*duration_secs)));
            }
            Self::Failed { stage, .. } => {
                fields.push(("Stage".to_string(), stage.clone()));
            }
            _ => {}
        }

        fields
    }
}

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a channel from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL)
            .ok()
            .filter(|url| !url.is_empty());

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a channel with an explicit webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Send an event to the webhook.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel is unconfigured or Slack rejects
    /// the request. Callers log this; it never fails a pipeline.
    pub async fn send(&self, event: &PipelineEvent) -> Result<()> {
        let Some(webhook_url) = self.webhook_url.as_ref() else {
            bail!("Slack channel not configured ({ENV_SLACK_WEBHOOK_URL} unset)");
        };

        let payload = format_payload(event);
        debug!(title = %event.title(), "sending Slack notification");

        let response = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Slack webhook request failed")?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook rejected the payload");
            bail!("Slack returned {status}: {body}");
        }
    }
}

fn format_payload(event: &PipelineEvent) -> SlackPayload {
    let fields = event
        .fields()
        .into_iter()
        .map(|(title, value)| SlackField {
            title,
            value,
            short: true,
        })
        .collect();

    let now = Utc::now();
    SlackPayload {
        attachments: vec![SlackAttachment {
            fallback: event.title(),
            color: event.color().to_string(),
            author_name: Some("eksops".to_string()),
            title: event.title(),
            text: event.description(),
            fields,
            footer: Some(now.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ts: Some(now.timestamp()),
        }],
    }
}

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

pub(crate) fn format_duration(secs: u64) -> String {
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3600), "1h 00m");
        assert_eq!(format_duration(3725), "1h 02m");
    }

    #[test]
    fn payload_shape_for_success() {
        let event = PipelineEvent::Succeeded {
            project: "demo-eks".to_string(),
            region: "eu-west-1".to_string(),
            duration_secs: 742,
            destroy: false,
        };
        let payload = serde_json::to_value(format_payload(&event)).unwrap();
        let attachment = &payload["attachments"][0];

        assert_eq!(attachment["color"], "good");
        assert_eq!(attachment["title"], "Deployment succeeded");
        assert_eq!(attachment["fields"][0]["title"], "Project");
        assert_eq!(attachment["fields"][0]["value"], "demo-eks");
        assert_eq!(attachment["fields"][2]["title"], "Duration");
        assert_eq!(attachment["fields"][2]["value"], "12m 22s");
    }

    #[test]
    fn payload_shape_for_failure() {
        let event = PipelineEvent::Failed {
            project: "demo-eks".to_string(),
            region: "eu-west-1".to_string(),
            stage: "Apply".to_string(),
            error: "terraform apply failed".to_string(),
        };
        let payload = serde_json::to_value(format_payload(&event)).unwrap();
        let attachment = &payload["attachments"][0];

        assert_eq!(attachment["color"], "danger");
        assert_eq!(attachment["title"], "Pipeline failed at Apply");
        assert!(attachment["text"]
            .as_str()
            .unwrap()
            .contains("terraform apply failed"));
    }

    #[test]
    fn disabled_channel_reports_unconfigured() {
        let channel = SlackChannel {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        assert!(!channel.enabled());
    }

    #[tokio::test]
    async fn delivers_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/hook"))
            .and(body_partial_json(serde_json::json!({
                "attachments": [{"color": "good"}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(format!("{}/services/hook", server.uri()));
        let event = PipelineEvent::NoChanges {
            project: "demo-eks".to_string(),
            region: "eu-west-1".to_string(),
        };
        channel.send(&event).await.unwrap();
    }

    #[tokio::test]
    async fn surfaces_webhook_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("no_service"))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(server.uri());
        let event = PipelineEvent::Started {
            project: "demo-eks".to_string(),
            region: "eu-west-1".to_string(),
            destroy: false,
        };
        let err = channel.send(&event).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
