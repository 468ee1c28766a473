use crate::config::StatisticsConfig;
use crate::policy::Outcome;
use std::time::Duration;
use url::Url;

/// Events tallied by the counter service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    Hit,
    Block,
    Pass,
}

impl StatEvent {
    pub fn path(&self) -> &'static str {
        match self {
            StatEvent::Hit => "hit",
            StatEvent::Block => "block",
            StatEvent::Pass => "pass",
        }
    }

    /// Events for one finished invocation. Errors only count as a hit.
    pub fn for_outcome(outcome: &Outcome) -> Vec<StatEvent> {
        match outcome {
            Outcome::Pass(_) => vec![StatEvent::Hit, StatEvent::Pass],
            Outcome::Block => vec![StatEvent::Hit, StatEvent::Block],
            Outcome::Failed(_) => vec![StatEvent::Hit],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("invalid statistics endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("cannot reach statistics service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("statistics service answered {0}")]
    Status(reqwest::StatusCode),
}

/// Client for the hit/block/pass counter service.
pub struct StatisticsCollector {
    client: reqwest::Client,
    base: Url,
}

impl StatisticsCollector {
    pub fn new(config: &StatisticsConfig) -> Result<Self, StatsError> {
        let mut base = Url::parse(&config.endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, base })
    }

    pub fn event_url(&self, event: StatEvent) -> Result<Url, StatsError> {
        Ok(self.base.join(event.path())?)
    }

    pub async fn record_event(&self, event: StatEvent) -> Result<(), StatsError> {
        let url = self.event_url(event)?;
        let status = self.client.get(url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StatsError::Status(status))
        }
    }

    /// Send every event for `outcome`, logging failures and carrying on.
    pub async fn record_outcome(&self, outcome: &Outcome) {
        for event in StatEvent::for_outcome(outcome) {
            if let Err(e) = self.record_event(event).await {
                log::warn!("Failed to send statistics event {}: {e}", event.path());
            }
        }
    }
}
