use std::fmt;

/// A sender address reduced to its `user@domain` core.
///
/// The local part is lower-cased, the domain is kept verbatim, so equality is
/// case-insensitive on the user and case-sensitive on the domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedAddress {
    pub local: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("no '@' in address: {0:?}")]
    NoAt(String),
    #[error("empty local part in address: {0:?}")]
    EmptyLocal(String),
    #[error("empty domain in address: {0:?}")]
    EmptyDomain(String),
}

/// Number of `@` characters anywhere in the raw value, display name included.
pub fn count_at(raw: &str) -> usize {
    raw.matches('@').count()
}

impl NormalizedAddress {
    /// Strip display-name and angle-bracket decoration and split into user and domain.
    ///
    /// `"Display Name" <User@corp.example>` becomes `user@corp.example`. When the value
    /// carries angle brackets only the bracketed part is considered, so an `@` inside a
    /// quoted display name never leaks into the result.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let mut addr = raw.trim();

        if let Some(open) = addr.rfind('<') {
            addr = &addr[open + 1..];
            if let Some(close) = addr.find('>') {
                addr = &addr[..close];
            }
        } else if let Some(stripped) = addr.strip_suffix('>') {
            addr = stripped;
        }
        let addr = addr.trim();

        let (local, domain) = addr
            .rsplit_once('@')
            .ok_or_else(|| AddressError::NoAt(raw.to_string()))?;
        let local = local.trim();
        let domain = domain.trim();

        if local.is_empty() {
            return Err(AddressError::EmptyLocal(raw.to_string()));
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(raw.to_string()));
        }

        Ok(Self {
            local: local.to_lowercase(),
            domain: domain.to_string(),
        })
    }
}

impl fmt::Display for NormalizedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}
