use crate::config::{NotificationConfig, RelayConfig};
use crate::correlation::CorrelationId;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no recipients")]
    NoRecipients,
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write message to relay: {0}")]
    Write(#[source] std::io::Error),
    #[error("relay exited with {0}")]
    Exit(std::process::ExitStatus),
    #[error("relay did not finish within {0:?}")]
    Timeout(Duration),
}

/// Hands a finished message to the outbound mail transport.
#[allow(async_fn_in_trait)]
pub trait Relay {
    async fn send(
        &self,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), RelayError>;
}

/// Delivers through the local `sendmail` binary: `sendmail -G -i -f <from> -- <rcpt>...`
#[derive(Debug, Clone)]
pub struct SendmailRelay {
    program: String,
    timeout: Duration,
}

impl SendmailRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            program: config.sendmail_path.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    fn command(&self, from: &str, recipients: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-G")
            .arg("-i")
            .arg("-f")
            .arg(from)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn deliver(
        &self,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), RelayError> {
        let mut child = self
            .command(from, recipients)
            .spawn()
            .map_err(|source| RelayError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data).await.map_err(RelayError::Write)?;
            stdin.shutdown().await.map_err(RelayError::Write)?;
        }

        let status = child.wait().await.map_err(RelayError::Write)?;
        if status.success() {
            Ok(())
        } else {
            Err(RelayError::Exit(status))
        }
    }
}

impl Relay for SendmailRelay {
    async fn send(
        &self,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), RelayError> {
        if recipients.is_empty() {
            return Err(RelayError::NoRecipients);
        }
        log::debug!(
            "Relaying {} bytes via {} from {} to {}",
            data.len(),
            self.program,
            from,
            recipients.join(" ")
        );
        tokio::time::timeout(self.timeout, self.deliver(from, recipients, data))
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))?
    }
}

/// Operator alert about one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(
        config: &NotificationConfig,
        correlation_id: &CorrelationId,
        reason: &str,
    ) -> Self {
        Self {
            from: config.from.clone(),
            to: config.to.clone(),
            subject: config.subject.clone(),
            body: format!("{correlation_id} {reason}"),
        }
    }

    /// Minimal RFC 5322 message; the relay fills in the rest.
    pub fn to_message(&self) -> Vec<u8> {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
            self.from, self.to, self.subject, self.body
        )
        .into_bytes()
    }

    pub async fn send<R: Relay>(&self, relay: &R) -> Result<(), RelayError> {
        relay
            .send(&self.from, std::slice::from_ref(&self.to), &self.to_message())
            .await
    }
}
