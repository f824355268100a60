//! Minimal reader for OpenSSH client configuration.
//!
//! Only `Host` and `HostName` lines are consumed; everything else belongs to
//! ssh itself.

use std::fs;
use std::path::Path;

use xpd_core::{ErrorInfo, XpdError};

/// One alias declared by a `Host` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// Alias as written after `Host`.
    pub alias: String,
    /// Value of the block's `HostName` line, if any.
    pub hostname: Option<String>,
}

/// Host aliases in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SshConfig {
    entries: Vec<HostEntry>,
}

impl SshConfig {
    /// Parses configuration text.
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<HostEntry> = Vec::new();
        let mut block_start = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = split_keyword(line);
            if key.eq_ignore_ascii_case("host") {
                block_start = entries.len();
                entries.extend(value.split_whitespace().map(|alias| HostEntry {
                    alias: alias.to_string(),
                    hostname: None,
                }));
            } else if key.eq_ignore_ascii_case("hostname") {
                for entry in &mut entries[block_start..] {
                    entry.hostname = Some(value.to_string());
                }
            }
        }
        Self { entries }
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, XpdError> {
        let text = fs::read_to_string(path).map_err(|err| {
            XpdError::Config(
                ErrorInfo::new("ssh_config_read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Ok(Self::parse(&text))
    }

    /// Declared aliases in file order.
    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    /// Resolves a requested host.
    ///
    /// A request ending in `*` resolves to the first declared alias starting
    /// with the preceding prefix; wildcard aliases are never returned. Other
    /// requests pass through untouched for ssh to interpret.
    pub fn resolve(&self, request: &str) -> Result<String, XpdError> {
        let Some(prefix) = request.strip_suffix('*') else {
            return Ok(request.to_string());
        };
        self.entries
            .iter()
            .filter(|entry| !entry.alias.contains(['*', '?']))
            .find(|entry| entry.alias.starts_with(prefix))
            .map(|entry| entry.alias.clone())
            .ok_or_else(|| {
                XpdError::Config(
                    ErrorInfo::new("host_unresolved", "no configured ssh alias matches")
                        .with_context("request", request)
                        .with_hint("add a matching `Host` entry to your ssh config"),
                )
            })
    }

    /// `HostName` declared for `alias`.
    pub fn hostname(&self, alias: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.alias == alias)
            .and_then(|entry| entry.hostname.as_deref())
    }
}

fn split_keyword(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.find(|c: char| c.is_whitespace() || c == '=') {
        Some(pos) => {
            let value = line[pos..].trim_start_matches(|c: char| c.is_whitespace() || c == '=');
            (&line[..pos], value.trim())
        }
        None => (line, ""),
    }
}
