//! One filter invocation, end to end: evaluate, dispatch, tally.

use crate::archive::Archive;
use crate::config::Config;
use crate::correlation::CorrelationId;
use crate::dispatch::{ActionStatus, DispatchReport, Dispatcher};
use crate::incident::{HttpIncidentReporter, IncidentReporter};
use crate::logging;
use crate::message::Envelope;
use crate::policy::{Evaluation, GateChain, Outcome, PolicyLists};
use crate::relay::{Notification, Relay, SendmailRelay};
use crate::statistics::StatisticsCollector;

pub const EXIT_OK: i32 = 0;
pub const EXIT_BLOCKED: i32 = 2;
pub const EXIT_POLICY_ERROR: i32 = 3;
/// EX_TEMPFAIL, the MTA keeps the message queued and retries
pub const EXIT_TEMPFAIL: i32 = 75;

/// Everything one invocation works on.
pub struct Invocation {
    pub config: Config,
    pub policy: PolicyLists,
    pub correlation_id: CorrelationId,
    pub envelope: Envelope,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub evaluation: Evaluation,
    pub actions: DispatchReport,
}

impl InvocationReport {
    pub fn outcome(&self) -> &Outcome {
        &self.evaluation.outcome
    }

    /// Process exit status. Always 0 unless `distinct` is set.
    pub fn exit_code(&self, distinct: bool) -> i32 {
        if !distinct {
            return EXIT_OK;
        }
        match self.outcome() {
            Outcome::Pass(_) => EXIT_OK,
            Outcome::Block if self.actions.plan.forward => EXIT_OK,
            Outcome::Block => EXIT_BLOCKED,
            Outcome::Failed(_) => EXIT_POLICY_ERROR,
        }
    }
}

impl Invocation {
    pub fn new(config: Config, envelope: Envelope, raw: Vec<u8>) -> Self {
        Self::with_id(config, CorrelationId::generate(), envelope, raw)
    }

    pub fn with_id(
        config: Config,
        correlation_id: CorrelationId,
        envelope: Envelope,
        raw: Vec<u8>,
    ) -> Self {
        let policy = config.policy_lists();
        Self {
            config,
            policy,
            correlation_id,
            envelope,
            raw,
        }
    }

    pub fn archive(&self) -> Archive {
        Archive::new(self.config.spool.archive_path())
    }

    /// Classify the message. No side effects.
    pub fn evaluate(&self) -> Evaluation {
        GateChain::new(&self.policy).evaluate(&self.envelope, &self.raw)
    }

    /// Evaluate and run the resulting action bundle through the given collaborators.
    pub async fn run_with<R: Relay, I: IncidentReporter>(
        &self,
        relay: &R,
        reporter: Option<&I>,
    ) -> InvocationReport {
        log::info!("Sender from args: {}", self.envelope.sender);
        log::info!("Recipients from args: {}", self.envelope.recipient_list());

        let evaluation = self.evaluate();
        log::info!("Sender from header: {}", evaluation.header_sender);
        let trace = &evaluation.trace;
        if let (Some(protected), Some(privileged), Some(differ)) = (
            trace.protected_domain,
            trace.privileged_user,
            trace.identities_differ,
        ) {
            log::debug!(
                "Gates: protected_domain={protected} privileged_user={privileged} \
                 identities_differ={differ}"
            );
        }

        let archive = self.archive();
        let dispatcher = Dispatcher {
            correlation_id: &self.correlation_id,
            relay,
            reporter,
            archive: &archive,
            notification: &self.config.notification,
            shadow_mode: self.config.shadow_mode,
        };
        let actions = dispatcher
            .dispatch(&self.envelope, &self.raw, &evaluation)
            .await;

        if actions.any_failed() {
            log::warn!(
                "Some actions failed (archive: {:?}, forward: {:?}, notify: {:?}, report: {:?})",
                actions.archive,
                actions.forward,
                actions.notify,
                actions.report
            );
        }

        InvocationReport {
            evaluation,
            actions,
        }
    }

    /// Run against the configured sendmail relay, incident service and counter service.
    pub async fn run(&self) -> InvocationReport {
        let relay = SendmailRelay::new(&self.config.relay);

        let reporter = if self.config.reporting.enabled {
            match HttpIncidentReporter::new(&self.config.reporting) {
                Ok(reporter) => Some(reporter),
                Err(e) => {
                    log::error!("Cannot set up incident reporting: {e}");
                    None
                }
            }
        } else {
            None
        };

        let report = self.run_with(&relay, reporter.as_ref()).await;

        if self.config.statistics.enabled {
            match StatisticsCollector::new(&self.config.statistics) {
                Ok(collector) => collector.record_outcome(report.outcome()).await,
                Err(e) => log::warn!("Cannot set up statistics: {e}"),
            }
        }

        report
    }

    /// Best effort when the invocation cannot start properly: keep a copy of the
    /// message and tell the operator. The message itself is not forwarded.
    pub async fn fatal_startup<R: Relay>(
        &self,
        relay: &R,
        reason: &str,
    ) -> (ActionStatus, ActionStatus) {
        let archived = match self.archive().store(&self.correlation_id, &self.raw) {
            Ok(_) => ActionStatus::Done,
            Err(e) => {
                eprintln!("{} cannot archive message: {e}", self.correlation_id);
                ActionStatus::Failed(e.to_string())
            }
        };
        let notification =
            Notification::new(&self.config.notification, &self.correlation_id, reason);
        let notified = match notification.send(relay).await {
            Ok(()) => ActionStatus::Done,
            Err(e) => {
                eprintln!("{} cannot send notification: {e}", self.correlation_id);
                ActionStatus::Failed(e.to_string())
            }
        };
        (archived, notified)
    }
}

/// Filter one message as the MTA hands it over. Returns the process exit status.
///
/// `read_error` is whatever went wrong reading the message; it is logged once the
/// log file is open and the bytes read so far are processed as usual.
pub async fn filter(
    config_path: &str,
    envelope: Envelope,
    raw: Vec<u8>,
    read_error: Option<std::io::Error>,
    verbose: bool,
    exit_status: bool,
) -> i32 {
    // The logger needs the configured log path, so configuration problems are logged afterwards
    let (config, config_error) = match Config::from_file(config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let distinct = exit_status || config.exit_status;
    let invocation = Invocation::new(config, envelope, raw);
    let id = invocation.correlation_id.clone();

    let log_path = invocation.config.spool.log_path();
    let log_file = match logging::open_log_file(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{id} Problem with opening log file {}: {e}", log_path.display());
            let relay = SendmailRelay::new(&invocation.config.relay);
            invocation
                .fatal_startup(&relay, "Problem with opening log file")
                .await;
            return if distinct { EXIT_TEMPFAIL } else { EXIT_OK };
        }
    };
    if let Err(e) = logging::init_invocation_logger(log_file, &id, verbose) {
        eprintln!("{id} cannot initialize logger: {e}");
    }

    if let Some(e) = config_error {
        log::warn!("Failed to load config {config_path} ({e}), using defaults");
    }
    if let Some(e) = read_error {
        log::error!("Problem with reading message from stdin: {e}");
    }

    let report = invocation.run().await;
    log::debug!("Actions: {}", report.actions.plan);
    report.exit_code(distinct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::dispatch::tests::{MemoryRelay, MemoryReporter};
    use crate::policy::{Identity, PassReason, PolicyError};
    use std::path::PathBuf;

    struct Scenario {
        _dir: tempfile::TempDir,
        invocation: Invocation,
        relay: MemoryRelay,
        reporter: MemoryReporter,
    }

    impl Scenario {
        fn new(policy: PolicyConfig, sender: &str, raw: &[u8]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config {
                policy,
                ..Default::default()
            };
            config.spool.spool_dir = dir.path().to_path_buf();
            config.spool.archive_dir = PathBuf::from(".");

            let envelope = Envelope::new(sender, vec!["someone@partner.example".to_string()]);
            Self {
                _dir: dir,
                invocation: Invocation::new(config, envelope, raw.to_vec()),
                relay: MemoryRelay::default(),
                reporter: MemoryReporter::default(),
            }
        }

        async fn run(&self) -> InvocationReport {
            self.invocation
                .run_with(&self.relay, Some(&self.reporter))
                .await
        }

        fn archived(&self) -> bool {
            self.invocation
                .archive()
                .path_for(&self.invocation.correlation_id)
                .exists()
        }
    }

    fn corp_policy() -> PolicyConfig {
        PolicyConfig {
            protected_domains: vec!["corp.example".to_string()],
            whitelisted_domains: vec!["external.com".to_string()],
            privileged_users: vec!["svc-billing".to_string()],
        }
    }

    #[tokio::test]
    async fn test_whitelisted_sender_passes_quietly() {
        let sc = Scenario::new(
            corp_policy(),
            "alerts@external.com",
            b"From: \"Alerts\" <alerts@external.com>\nSubject: disk full\n\nbody\n",
        );
        let report = sc.run().await;

        assert_eq!(
            report.outcome(),
            &Outcome::Pass(PassReason::Whitelisted(Identity::Envelope))
        );
        assert!(report.actions.delivered());
        assert!(!sc.archived());
        assert!(sc.reporter.records.borrow().is_empty());
        assert_eq!(sc.relay.sent.borrow().len(), 1);
        assert_eq!(report.exit_code(true), EXIT_OK);
    }

    #[tokio::test]
    async fn test_spoofed_service_account_is_blocked() {
        let sc = Scenario::new(
            corp_policy(),
            "attacker@evil.com",
            b"From: svc-billing@corp.example\nSubject: invoice\n\npay\n",
        );
        let report = sc.run().await;

        assert_eq!(report.outcome(), &Outcome::Block);
        assert!(!report.actions.delivered());
        assert!(sc.archived());
        assert_eq!(report.actions.notify, ActionStatus::Done);

        let records = sc.reporter.records.borrow();
        assert_eq!(records.len(), 1);
        assert!(records[0].blocked);
        assert_eq!(records[0].sender, "attacker@evil.com");
        assert_eq!(records[0].correlation_id, sc.invocation.correlation_id.as_str());

        assert_eq!(report.exit_code(false), EXIT_OK);
        assert_eq!(report.exit_code(true), EXIT_BLOCKED);
    }

    #[tokio::test]
    async fn test_matching_service_account_passes() {
        let sc = Scenario::new(
            corp_policy(),
            "svc-billing@corp.example",
            b"From: svc-billing@corp.example\n\nbody\n",
        );
        let report = sc.run().await;

        assert_eq!(report.outcome(), &Outcome::Pass(PassReason::IdentityMatch));
        assert!(report.actions.delivered());
        assert!(!sc.archived());
        assert!(sc.reporter.records.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_missing_from_header_fails_open() {
        let sc = Scenario::new(
            corp_policy(),
            "svc-billing@corp.example",
            b"Subject: no from\n\nbody\n",
        );
        let report = sc.run().await;

        assert!(matches!(
            report.outcome(),
            Outcome::Failed(PolicyError::Format { at_count: 0, .. })
        ));
        assert!(report.actions.delivered());
        assert!(sc.archived());
        assert_eq!(report.actions.notify, ActionStatus::Done);
        assert!(sc.reporter.records.borrow().is_empty());
        assert_eq!(report.exit_code(true), EXIT_POLICY_ERROR);
    }

    #[tokio::test]
    async fn test_from_without_at_sign_fails_open() {
        let sc = Scenario::new(
            corp_policy(),
            "attacker@evil.com",
            b"From: <bad-format-no-at-sign>\n\nbody\n",
        );
        let report = sc.run().await;

        assert!(matches!(report.outcome(), Outcome::Failed(_)));
        assert!(!report.outcome().is_block());
        assert!(report.actions.delivered());
        assert!(sc.archived());
    }

    #[tokio::test]
    async fn test_empty_input_fails_open() {
        let sc = Scenario::new(corp_policy(), "attacker@evil.com", b"");
        let report = sc.run().await;

        assert!(matches!(report.outcome(), Outcome::Failed(PolicyError::Parse(_))));
        assert!(report.actions.delivered());
        assert!(sc.archived());
    }

    #[tokio::test]
    async fn test_shadow_mode_exit_code() {
        let mut sc = Scenario::new(
            corp_policy(),
            "attacker@evil.com",
            b"From: svc-billing@corp.example\n\npay\n",
        );
        sc.invocation.config.shadow_mode = true;
        let report = sc.run().await;

        assert_eq!(report.outcome(), &Outcome::Block);
        assert!(report.actions.delivered());
        assert!(!sc.reporter.records.borrow()[0].blocked);
        assert_eq!(report.exit_code(true), EXIT_OK);
    }

    #[tokio::test]
    async fn test_fatal_startup_archives_and_notifies() {
        let sc = Scenario::new(corp_policy(), "a@corp.example", b"From: a@corp.example\n\nx\n");
        let (archived, notified) = sc
            .invocation
            .fatal_startup(&sc.relay, "Problem with opening log file")
            .await;

        assert_eq!(archived, ActionStatus::Done);
        assert_eq!(notified, ActionStatus::Done);
        assert!(sc.archived());

        let sent = sc.relay.sent.borrow();
        assert_eq!(sent.len(), 1);
        let note = String::from_utf8(sent[0].data.clone()).unwrap();
        assert!(note.contains("Problem with opening log file"));
    }

    /// Config on disk whose log file cannot be opened, with a sendmail stand-in
    /// that appends its arguments to `sendmail.args`.
    #[cfg(unix)]
    fn unloggable_config(dir: &std::path::Path, exit_status: bool) -> String {
        use std::os::unix::fs::PermissionsExt;

        let sendmail = dir.join("sendmail");
        let args = dir.join("sendmail.args");
        std::fs::write(
            &sendmail,
            format!("#!/bin/sh\necho \"$@\" >> {}\ncat > /dev/null\n", args.display()),
        )
        .unwrap();
        std::fs::set_permissions(&sendmail, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config {
            policy: corp_policy(),
            exit_status,
            ..Default::default()
        };
        config.spool.spool_dir = dir.to_path_buf();
        config.spool.archive_dir = PathBuf::from("queue");
        config.spool.log_file = PathBuf::from("nope/proxy.log");
        config.relay.sendmail_path = sendmail.display().to_string();
        config.reporting.enabled = false;
        std::fs::create_dir(dir.join("queue")).unwrap();

        let path = dir.join("mailproxy.yaml");
        config.to_file(&path).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    async fn filter_unloggable(
        exit_flag: bool,
        config_exit_status: bool,
    ) -> (i32, Vec<String>, usize) {
        let dir = tempfile::tempdir().unwrap();
        let config_path = unloggable_config(dir.path(), config_exit_status);
        let envelope = Envelope::new(
            "attacker@evil.com",
            vec!["someone@partner.example".to_string()],
        );
        let raw = b"From: svc-billing@corp.example\n\npay\n".to_vec();

        let code = filter(&config_path, envelope, raw, None, false, exit_flag).await;

        let calls = std::fs::read_to_string(dir.path().join("sendmail.args"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        let archived = std::fs::read_dir(dir.path().join("queue")).unwrap().count();
        (code, calls, archived)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_unopenable_log_defers_with_exit_status() {
        let (code, calls, archived) = filter_unloggable(true, false).await;

        assert_eq!(code, EXIT_TEMPFAIL);
        assert_eq!(archived, 1);
        // Only the operator notification went out, the message itself was not forwarded
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("-- postmaster@localhost"));
        assert!(!calls.iter().any(|c| c.contains("someone@partner.example")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_unopenable_log_exits_zero_by_default() {
        let (code, calls, archived) = filter_unloggable(false, false).await;

        assert_eq!(code, EXIT_OK);
        assert_eq!(archived, 1);
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].contains("someone@partner.example"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_exit_status_from_config() {
        let (code, _, archived) = filter_unloggable(false, true).await;

        assert_eq!(code, EXIT_TEMPFAIL);
        assert_eq!(archived, 1);
    }
}
