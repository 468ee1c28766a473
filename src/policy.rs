//! Policy gate chain
//!
//! Classifies one message as pass or block from its two sender identities and the
//! static policy lists. Gates run in a fixed order:
//!
//! 1. format: the `From` value must hold one or two `@`
//! 2. whitelist: either identity's domain whitelisted passes immediately
//! 3. protected domain: the header identity claims a protected domain
//! 4. privileged user: either identity's user is privileged
//! 5. mismatch: envelope and header identities differ
//!
//! Only 3, 4 and 5 together block. Any error along the way is reported as
//! [`Outcome::Failed`] and never as a block.

use crate::address::{count_at, AddressError, NormalizedAddress};
use crate::message::{header_sender, Envelope, Identities, MessageError};
use std::collections::HashSet;
use std::fmt;

/// Static policy lists, built once at startup and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLists {
    protected_domains: HashSet<String>,
    whitelisted_domains: HashSet<String>,
    privileged_users: HashSet<String>,
}

impl PolicyLists {
    pub fn new<P, W, U>(protected_domains: P, whitelisted_domains: W, privileged_users: U) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            protected_domains: clean(protected_domains).collect(),
            whitelisted_domains: clean(whitelisted_domains).collect(),
            privileged_users: clean(privileged_users).map(|u| u.to_lowercase()).collect(),
        }
    }

    pub fn is_protected_domain(&self, domain: &str) -> bool {
        self.protected_domains.contains(domain)
    }

    pub fn is_whitelisted_domain(&self, domain: &str) -> bool {
        self.whitelisted_domains.contains(domain)
    }

    /// `user` must already be normalized (lower-case).
    pub fn is_privileged_user(&self, user: &str) -> bool {
        self.privileged_users.contains(user)
    }

    pub fn protected_domains(&self) -> impl Iterator<Item = &str> {
        self.protected_domains.iter().map(String::as_str)
    }

    pub fn whitelisted_domains(&self) -> impl Iterator<Item = &str> {
        self.whitelisted_domains.iter().map(String::as_str)
    }

    pub fn privileged_users(&self) -> impl Iterator<Item = &str> {
        self.privileged_users.iter().map(String::as_str)
    }
}

fn clean<I>(items: I) -> impl Iterator<Item = String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    items
        .into_iter()
        .map(|item| item.into().trim().to_string())
        .filter(|item| !item.is_empty())
}

/// Anything that stops the chain from reaching a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("cannot parse message: {0}")]
    Parse(#[from] MessageError),
    #[error("wrong From format: {at_count} '@' in {header_sender:?}")]
    Format {
        header_sender: String,
        at_count: usize,
    },
    #[error("cannot normalize {which} sender: {source}")]
    Address {
        which: Identity,
        #[source]
        source: AddressError,
    },
}

impl PolicyError {
    /// Short operator-facing reason, used in notifications.
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyError::Parse(_) => "Cannot parse message",
            PolicyError::Format { .. } => "Wrong From format",
            PolicyError::Address {
                which: Identity::Envelope,
                ..
            } => "Cannot normalize envelope sender",
            PolicyError::Address {
                which: Identity::Header,
                ..
            } => "Cannot normalize From header",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Envelope,
    Header,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Envelope => f.write_str("envelope"),
            Identity::Header => f.write_str("header"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// An identity's domain is whitelisted
    Whitelisted(Identity),
    /// Not a protected-domain privileged identity
    NoMatch,
    /// Protected and privileged, but both identities agree
    IdentityMatch,
}

/// Terminal classification of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass(PassReason),
    Block,
    Failed(PolicyError),
}

impl Outcome {
    pub fn is_block(&self) -> bool {
        matches!(self, Outcome::Block)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pass(PassReason::Whitelisted(_)) => "PASSED (WHITELISTED domain)",
            Outcome::Pass(_) => "PASSED",
            Outcome::Block => "BLOCKED",
            Outcome::Failed(_) => "ERROR",
        }
    }
}

/// Gate results recorded on the way to the verdict, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateTrace {
    pub protected_domain: Option<bool>,
    pub privileged_user: Option<bool>,
    pub identities_differ: Option<bool>,
}

/// Result of running the chain over one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub header_sender: String,
    pub identities: Option<Identities>,
    pub trace: GateTrace,
    pub outcome: Outcome,
}

/// Format gate: one `@` for a bare address, two for a decorated one.
pub fn check_format(header_sender: &str) -> Result<(), PolicyError> {
    match count_at(header_sender) {
        1 | 2 => Ok(()),
        at_count => Err(PolicyError::Format {
            header_sender: header_sender.to_string(),
            at_count,
        }),
    }
}

pub struct GateChain<'a> {
    policy: &'a PolicyLists,
}

impl<'a> GateChain<'a> {
    pub fn new(policy: &'a PolicyLists) -> Self {
        Self { policy }
    }

    /// Classify a message from its envelope and raw bytes. Pure; performs no I/O.
    pub fn evaluate(&self, envelope: &Envelope, raw: &[u8]) -> Evaluation {
        let header_sender = match header_sender(raw) {
            Ok(sender) => sender,
            Err(e) => {
                return Evaluation {
                    header_sender: String::new(),
                    identities: None,
                    trace: GateTrace::default(),
                    outcome: Outcome::Failed(e.into()),
                }
            }
        };
        self.evaluate_senders(&envelope.sender, &header_sender)
    }

    /// Classify from the two raw sender values.
    pub fn evaluate_senders(&self, envelope_sender: &str, header_sender: &str) -> Evaluation {
        let mut trace = GateTrace::default();
        let result = self.run_gates(envelope_sender, header_sender, &mut trace);
        let (identities, outcome) = match result {
            Ok((identities, outcome)) => (Some(identities), outcome),
            Err(e) => (None, Outcome::Failed(e)),
        };
        Evaluation {
            header_sender: header_sender.to_string(),
            identities,
            trace,
            outcome,
        }
    }

    fn run_gates(
        &self,
        envelope_sender: &str,
        header_sender: &str,
        trace: &mut GateTrace,
    ) -> Result<(Identities, Outcome), PolicyError> {
        check_format(header_sender)?;

        let envelope = normalize(envelope_sender, Identity::Envelope)?;
        let header = normalize(header_sender, Identity::Header)?;
        let identities = Identities {
            envelope_sender: envelope_sender.to_string(),
            envelope,
            header_sender: header_sender.to_string(),
            header,
        };

        if let Some(which) = self.whitelisted(&identities) {
            return Ok((identities, Outcome::Pass(PassReason::Whitelisted(which))));
        }

        let protected = self.policy.is_protected_domain(&identities.header.domain);
        let privileged = self.policy.is_privileged_user(&identities.envelope.local)
            || self.policy.is_privileged_user(&identities.header.local);
        let differ = identities.envelope != identities.header;

        trace.protected_domain = Some(protected);
        trace.privileged_user = Some(privileged);
        trace.identities_differ = Some(differ);

        let outcome = match (protected && privileged, differ) {
            (true, true) => Outcome::Block,
            (true, false) => Outcome::Pass(PassReason::IdentityMatch),
            (false, _) => Outcome::Pass(PassReason::NoMatch),
        };
        Ok((identities, outcome))
    }

    fn whitelisted(&self, identities: &Identities) -> Option<Identity> {
        if self.policy.is_whitelisted_domain(&identities.envelope.domain) {
            Some(Identity::Envelope)
        } else if self.policy.is_whitelisted_domain(&identities.header.domain) {
            Some(Identity::Header)
        } else {
            None
        }
    }
}

fn normalize(raw: &str, which: Identity) -> Result<NormalizedAddress, PolicyError> {
    NormalizedAddress::parse(raw).map_err(|source| PolicyError::Address { which, source })
}

/// Classify one message against `policy`.
pub fn evaluate(policy: &PolicyLists, envelope: &Envelope, raw: &[u8]) -> Evaluation {
    GateChain::new(policy).evaluate(envelope, raw)
}
