//! Names of state variables (`domain.name`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VarNameError {
    #[error("state variable name must look like 'domain.name'")]
    InvalidFormat,

    #[error("domain '{0}' must start with a lowercase letter and contain only a-z, 0-9 and '_'")]
    InvalidDomain(String),

    #[error("name '{0}' must be non-empty and contain only a-z, 0-9 and '_'")]
    InvalidName(String),
}

/// A state variable name such as `autoscript.done` or `sensor.temp_1`
///
/// The domain must be usable as an identifier inside trigger expressions, so
/// it has to start with a letter. The name part may start with a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VarName {
    domain: String,
    name: String,
}

impl VarName {
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Result<Self, VarNameError> {
        let domain = domain.into();
        let name = name.into();

        if !is_valid_domain(&domain) {
            return Err(VarNameError::InvalidDomain(domain));
        }
        if !is_valid_name(&name) {
            return Err(VarNameError::InvalidName(name));
        }

        Ok(Self { domain, name })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_domain(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_lowercase()) && is_valid_name(s)
}

impl FromStr for VarName {
    type Err = VarNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, name) = s.split_once('.').ok_or(VarNameError::InvalidFormat)?;
        if name.contains('.') {
            return Err(VarNameError::InvalidFormat);
        }
        Self::new(domain, name)
    }
}

impl TryFrom<String> for VarName {
    type Error = VarNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VarName> for String {
    fn from(var: VarName) -> String {
        var.to_string()
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let var: VarName = "autoscript.f1var1".parse().unwrap();
        assert_eq!(var.domain(), "autoscript");
        assert_eq!(var.name(), "f1var1");
        assert_eq!(var.to_string(), "autoscript.f1var1");

        assert!("sensor.1st_floor".parse::<VarName>().is_ok());
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "nodot".parse::<VarName>().unwrap_err(),
            VarNameError::InvalidFormat
        );
        assert_eq!(
            "a.b.c".parse::<VarName>().unwrap_err(),
            VarNameError::InvalidFormat
        );
    }

    #[test]
    fn test_invalid_parts() {
        assert!(matches!(
            "1domain.x".parse::<VarName>(),
            Err(VarNameError::InvalidDomain(_))
        ));
        assert!(matches!(
            "Domain.x".parse::<VarName>(),
            Err(VarNameError::InvalidDomain(_))
        ));
        assert!(matches!(
            "light.".parse::<VarName>(),
            Err(VarNameError::InvalidName(_))
        ));
        assert!(matches!(
            "light.has-dash".parse::<VarName>(),
            Err(VarNameError::InvalidName(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let var = VarName::new("switch", "kitchen").unwrap();
        let json = serde_json::to_string(&var).unwrap();
        assert_eq!(json, "\"switch.kitchen\"");
        assert_eq!(serde_json::from_str::<VarName>(&json).unwrap(), var);
    }
}
