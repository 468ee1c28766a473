//! Action dispatch
//!
//! Turns a classification into its fixed bundle of side effects:
//!
//! | outcome | forward          | archive | notify | report            |
//! |---------|------------------|---------|--------|-------------------|
//! | pass    | yes              | no      | no     | no                |
//! | block   | shadow mode only | yes     | yes    | blocked unless shadow |
//! | error   | yes              | yes     | yes    | no                |
//!
//! Actions run in the order archive, forward, notify, report. Each one is
//! attempted regardless of how the previous ones went.

use crate::archive::Archive;
use crate::config::NotificationConfig;
use crate::correlation::CorrelationId;
use crate::incident::{DecisionRecord, IncidentReporter};
use crate::message::Envelope;
use crate::policy::{Evaluation, Outcome};
use crate::relay::{Notification, Relay};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPlan {
    pub archive: bool,
    pub forward: bool,
    pub notify: bool,
    /// `Some(blocked)` when a decision record is sent
    pub report: Option<bool>,
}

impl ActionPlan {
    pub fn for_outcome(outcome: &Outcome, shadow_mode: bool) -> Self {
        match outcome {
            Outcome::Pass(_) => Self {
                archive: false,
                forward: true,
                notify: false,
                report: None,
            },
            Outcome::Block => Self {
                archive: true,
                forward: shadow_mode,
                notify: true,
                report: Some(!shadow_mode),
            },
            Outcome::Failed(_) => Self {
                archive: true,
                forward: true,
                notify: true,
                report: None,
            },
        }
    }
}

impl fmt::Display for ActionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let report = match self.report {
            Some(true) => "yes (blocked=true)",
            Some(false) => "yes (blocked=false)",
            None => "no",
        };
        write!(
            f,
            "archive: {}, forward: {}, notify: {}, report: {}",
            yes_no(self.archive),
            yes_no(self.forward),
            yes_no(self.notify),
            report
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Done,
    Skipped,
    Failed(String),
}

impl ActionStatus {
    fn from_result<E: fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ActionStatus::Done,
            Err(e) => ActionStatus::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ActionStatus::Failed(_))
    }
}

/// How each action of the bundle went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub plan: ActionPlan,
    pub archive: ActionStatus,
    pub forward: ActionStatus,
    pub notify: ActionStatus,
    pub report: ActionStatus,
}

impl DispatchReport {
    /// Whether the message went out to its recipients.
    pub fn delivered(&self) -> bool {
        self.forward == ActionStatus::Done
    }

    pub fn any_failed(&self) -> bool {
        [&self.archive, &self.forward, &self.notify, &self.report]
            .iter()
            .any(|status| status.is_failed())
    }
}

/// Collaborators and per-invocation context for executing an action bundle.
pub struct Dispatcher<'a, R: Relay, I: IncidentReporter> {
    pub correlation_id: &'a CorrelationId,
    pub relay: &'a R,
    /// `None` when incident reporting is switched off
    pub reporter: Option<&'a I>,
    pub archive: &'a Archive,
    pub notification: &'a NotificationConfig,
    pub shadow_mode: bool,
}

impl<'a, R: Relay, I: IncidentReporter> Dispatcher<'a, R, I> {
    pub async fn dispatch(
        &self,
        envelope: &Envelope,
        raw: &[u8],
        evaluation: &Evaluation,
    ) -> DispatchReport {
        let outcome = &evaluation.outcome;
        let plan = ActionPlan::for_outcome(outcome, self.shadow_mode);
        let summary = format!("{} => {}", envelope.sender, envelope.recipient_list());

        match outcome {
            Outcome::Pass(_) => log::info!("{}: {summary}", outcome.label()),
            Outcome::Block if self.shadow_mode => {
                log::info!("BLOCKED (shadow mode, delivering anyway): {summary}")
            }
            Outcome::Block => log::info!("BLOCKED: {summary}"),
            Outcome::Failed(e) => log::error!("{e}"),
        }

        let archive = if plan.archive {
            self.archive_message(raw)
        } else {
            ActionStatus::Skipped
        };

        let forward = if plan.forward {
            self.forward(envelope, raw).await
        } else {
            ActionStatus::Skipped
        };

        let notify = if plan.notify {
            self.notify(&notification_reason(outcome, &summary)).await
        } else {
            ActionStatus::Skipped
        };

        let report = match plan.report {
            Some(blocked) => self.report(envelope, evaluation, blocked).await,
            None => ActionStatus::Skipped,
        };

        DispatchReport {
            plan,
            archive,
            forward,
            notify,
            report,
        }
    }

    fn archive_message(&self, raw: &[u8]) -> ActionStatus {
        match self.archive.store(self.correlation_id, raw) {
            Ok(path) => {
                log::info!("saved to: {}", path.display());
                ActionStatus::Done
            }
            Err(e) => {
                log::error!("Failed to archive message: {e}");
                ActionStatus::Failed(e.to_string())
            }
        }
    }

    async fn forward(&self, envelope: &Envelope, raw: &[u8]) -> ActionStatus {
        let result = self
            .relay
            .send(&envelope.sender, &envelope.recipients, raw)
            .await;
        if let Err(e) = &result {
            log::error!("Failed to forward message: {e}");
        } else {
            log::debug!("Message handed to relay");
        }
        ActionStatus::from_result(result)
    }

    async fn notify(&self, reason: &str) -> ActionStatus {
        let notification = Notification::new(self.notification, self.correlation_id, reason);
        let result = notification.send(self.relay).await;
        if let Err(e) = &result {
            log::error!("Failed to notify {}: {e}", notification.to);
        }
        ActionStatus::from_result(result)
    }

    async fn report(
        &self,
        envelope: &Envelope,
        evaluation: &Evaluation,
        blocked: bool,
    ) -> ActionStatus {
        let Some(reporter) = self.reporter else {
            log::info!("Incident reporting disabled, record not sent");
            return ActionStatus::Skipped;
        };
        let record = DecisionRecord::new(
            self.correlation_id,
            envelope,
            &evaluation.header_sender,
            blocked,
        );
        let result = reporter.report(&record).await;
        match &result {
            Ok(()) => log::info!("Incident reported (blocked={blocked})"),
            Err(e) => log::error!("Failed to report incident: {e}"),
        }
        ActionStatus::from_result(result)
    }
}

fn notification_reason(outcome: &Outcome, summary: &str) -> String {
    match outcome {
        Outcome::Failed(e) => e.reason().to_string(),
        _ => format!("{}: {summary}", outcome.label()),
    }
}
