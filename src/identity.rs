//! Identity binding: compares a key's `usr`/`hst`/`net` binding with the
//! identity of the running host.

use std::env;

use crate::config::ValidatorConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::record::{Binding, LicenseRecord};

/// Identity the caller runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    pub user: Option<String>,
    pub host: Option<String>,
    pub network: Option<String>,
}

impl HostIdentity {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            host: Some(host.into()),
            network: None,
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }
}

/// Source of the current host identity.
pub trait IdentityProvider {
    fn identity(&self) -> HostIdentity;
}

impl IdentityProvider for HostIdentity {
    fn identity(&self) -> HostIdentity {
        self.clone()
    }
}

/// Reads the login user and the local host name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl SystemIdentity {
    fn user_name() -> Option<String> {
        ["USER", "USERNAME", "LOGNAME"]
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
    }

    fn host_name() -> Option<String> {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
    }
}

impl IdentityProvider for SystemIdentity {
    fn identity(&self) -> HostIdentity {
        HostIdentity {
            user: Self::user_name(),
            host: Self::host_name(),
            network: None,
        }
    }
}

fn names_match(bound: &str, actual: Option<&str>, case_insensitive: bool) -> bool {
    match actual {
        Some(actual) if case_insensitive => bound.to_lowercase() == actual.to_lowercase(),
        Some(actual) => bound == actual,
        None => false,
    }
}

/// Every key must carry a `usr`, `hst` or `net` binding.
pub(crate) fn require_binding(record: &LicenseRecord) -> LicenseResult<()> {
    if record.binding().is_none() {
        return Err(LicenseError::malformed(
            "key has no 'usr', 'hst' or 'net' binding",
        ));
    }
    Ok(())
}

/// Check the record's binding against `identity`.
///
/// Enforced keys are always checked. Otherwise privileged keys skip the
/// comparison.
pub fn bind(
    record: &LicenseRecord,
    identity: &HostIdentity,
    config: &ValidatorConfig,
) -> LicenseResult<()> {
    let Some(binding) = record.binding() else {
        return Ok(());
    };

    if record.is_privileged() && !record.is_enforced() {
        log::debug!("identity check bypassed for privileged key");
        return Ok(());
    }

    let ci = config.case_insensitive_identity;
    let mismatch = match binding {
        Binding::User { user, host } => {
            if !names_match(user, identity.user.as_deref(), ci) {
                Some(format!("user '{user}'"))
            } else {
                match host {
                    Some(host) if !names_match(host, identity.host.as_deref(), ci) => {
                        Some(format!("host '{host}'"))
                    }
                    _ => None,
                }
            }
        }
        Binding::Host(host) => {
            (!names_match(host, identity.host.as_deref(), ci)).then(|| format!("host '{host}'"))
        }
        Binding::Network(net) => (!names_match(net, identity.network.as_deref(), ci))
            .then(|| format!("network '{net}'")),
    };

    match mismatch {
        Some(what) => Err(LicenseError::IdentityMismatch(format!(
            "key is bound to {what}"
        ))),
        None => Ok(()),
    }
}
