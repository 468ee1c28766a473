use crate::policy::PolicyLists;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub spool: SpoolConfig,
    pub relay: RelayConfig,
    pub notification: NotificationConfig,
    pub reporting: ReportingConfig,
    pub statistics: StatisticsConfig,
    /// Deliver blocked messages anyway and report them as not blocked
    pub shadow_mode: bool,
    /// Exit with a status that tells pass, block and error apart
    pub exit_status: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub protected_domains: Vec<String>,
    pub whitelisted_domains: Vec<String>,
    pub privileged_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub spool_dir: PathBuf,
    /// Relative paths are resolved against `spool_dir`
    pub archive_dir: PathBuf,
    /// Relative paths are resolved against `spool_dir`
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub sendmail_path: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub from: String,
    pub to: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("/var/spool/mailProxy"),
            archive_dir: PathBuf::from("queue"),
            log_file: PathBuf::from("logs/proxy.log"),
        }
    }
}

impl SpoolConfig {
    pub fn archive_path(&self) -> PathBuf {
        self.spool_dir.join(&self.archive_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.spool_dir.join(&self.log_file)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sendmail_path: "/usr/sbin/sendmail".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            from: "mailProxy@localhost".to_string(),
            to: "postmaster@localhost".to_string(),
            subject: "mailProxy problem!".to_string(),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:8080/mails".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8000".to_string(),
            timeout_seconds: 5,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Example configuration written by `--generate-config`.
    pub fn sample() -> Self {
        Self {
            policy: PolicyConfig {
                protected_domains: vec!["corp.example".to_string(), "corp.example.net".to_string()],
                whitelisted_domains: vec![
                    "tickets.corp.example".to_string(),
                    "alerts.example.com".to_string(),
                ],
                privileged_users: vec!["svc-billing".to_string(), "root".to_string()],
            },
            notification: NotificationConfig {
                from: "mailProxy@corp.example".to_string(),
                to: "postmaster@corp.example".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Policy lists for the gate chain.
    pub fn policy_lists(&self) -> PolicyLists {
        PolicyLists::new(
            self.policy.protected_domains.iter().cloned(),
            self.policy.whitelisted_domains.iter().cloned(),
            self.policy.privileged_users.iter().cloned(),
        )
    }

    /// Problems worth an operator's attention. None of them stop the filter from running.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let policy = &self.policy;

        if policy.protected_domains.is_empty() {
            warnings.push("no protected domains configured, nothing will be blocked".to_string());
        }
        if policy.privileged_users.is_empty() {
            warnings.push("no privileged users configured, nothing will be blocked".to_string());
        }

        let domains = policy
            .protected_domains
            .iter()
            .chain(&policy.whitelisted_domains);
        for domain in domains {
            if domain.contains('@') {
                warnings.push(format!("domain entry {domain:?} contains '@'"));
            }
            if domain.trim() != domain {
                warnings.push(format!("domain entry {domain:?} has surrounding whitespace"));
            }
        }
        for user in &policy.privileged_users {
            if user.contains('@') {
                warnings.push(format!(
                    "privileged user {user:?} contains '@', list local parts only"
                ));
            }
        }
        for domain in &policy.protected_domains {
            if policy.whitelisted_domains.contains(domain) {
                warnings.push(format!(
                    "{domain:?} is both protected and whitelisted, the whitelist wins"
                ));
            }
        }
        if let Err(e) = url::Url::parse(&self.reporting.endpoint) {
            warnings.push(format!(
                "reporting endpoint {:?} is not a valid URL: {e}",
                self.reporting.endpoint
            ));
        }
        if let Err(e) = url::Url::parse(&self.statistics.endpoint) {
            warnings.push(format!(
                "statistics endpoint {:?} is not a valid URL: {e}",
                self.statistics.endpoint
            ));
        }

        warnings
    }
}

/// Load `path`, falling back to defaults when it is missing or unreadable.
///
/// Defaults carry empty policy lists, so a broken configuration never blocks mail.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Config {
    let path = path.as_ref();
    if !path.exists() {
        log::warn!(
            "Configuration file '{}' not found, using default configuration",
            path.display()
        );
        return Config::default();
    }
    match Config::from_file(path) {
        Ok(config) => {
            log::debug!("Loaded configuration from: {}", path.display());
            config
        }
        Err(e) => {
            log::warn!(
                "Failed to load config {} ({e}), using defaults",
                path.display()
            );
            Config::default()
        }
    }
}
