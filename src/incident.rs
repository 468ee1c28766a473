use crate::config::ReportingConfig;
use crate::correlation::CorrelationId;
use crate::message::Envelope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the incident service stores about one held message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub sender: String,
    #[serde(rename = "senderheader")]
    pub sender_header: String,
    /// All recipients, space separated
    #[serde(rename = "recipient")]
    pub recipients: String,
    #[serde(rename = "queue")]
    pub correlation_id: String,
    pub blocked: bool,
}

impl DecisionRecord {
    pub fn new(
        correlation_id: &CorrelationId,
        envelope: &Envelope,
        header_sender: &str,
        blocked: bool,
    ) -> Self {
        Self {
            sender: envelope.sender.clone(),
            sender_header: header_sender.to_string(),
            recipients: envelope.recipient_list(),
            correlation_id: correlation_id.to_string(),
            blocked,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cannot reach incident service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("incident service answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Sink for decision records.
#[allow(async_fn_in_trait)]
pub trait IncidentReporter {
    async fn report(&self, record: &DecisionRecord) -> Result<(), ReportError>;
}

/// Posts records as JSON to the incident service.
#[derive(Debug, Clone)]
pub struct HttpIncidentReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIncidentReporter {
    pub fn new(config: &ReportingConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl IncidentReporter for HttpIncidentReporter {
    async fn report(&self, record: &DecisionRecord) -> Result<(), ReportError> {
        let body = serde_json::to_vec(record)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/json; charset=utf-8",
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            log::debug!("Incident service accepted record ({status})");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReportError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DecisionRecord {
        let envelope = Envelope::new(
            "attacker@evil.com",
            vec!["a@partner.example".to_string(), "b@partner.example".to_string()],
        );
        DecisionRecord::new(
            &CorrelationId::generate(),
            &envelope,
            "svc-billing@corp.example",
            true,
        )
    }

    fn reporter(endpoint: String) -> HttpIncidentReporter {
        HttpIncidentReporter::new(&ReportingConfig {
            enabled: true,
            endpoint,
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_record_wire_format() {
        let record = record();
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sender"], "attacker@evil.com");
        assert_eq!(json["senderheader"], "svc-billing@corp.example");
        assert_eq!(json["recipient"], "a@partner.example b@partner.example");
        assert_eq!(json["queue"], record.correlation_id.as_str());
        assert_eq!(json["blocked"], true);
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_report_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let record = record();
        let mock = server
            .mock("POST", "/mails")
            .match_header("content-type", "application/json; charset=utf-8")
            .match_body(mockito::Matcher::Json(serde_json::to_value(&record).unwrap()))
            .with_status(201)
            .create_async()
            .await;

        let reporter = reporter(format!("{}/mails", server.url()));
        reporter.report(&record).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/mails")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let reporter = reporter(format!("{}/mails", server.url()));
        let err = reporter.report(&record()).await.unwrap_err();
        match err {
            ReportError::Status { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_report_unreachable() {
        let reporter = reporter("http://127.0.0.1:9/mails".to_string());
        let err = reporter.report(&record()).await.unwrap_err();
        assert!(matches!(err, ReportError::Transport(_)));
    }
}
