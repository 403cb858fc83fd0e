//! Identity Name Module
//!
//! Assembles the distinguished name a system enrolls under. The name is the
//! dot-joined sequence of naming attributes:
//!
//! ```text
//! <system_name>.<cloud_name>.<operator>.<domain_suffix>
//! sysA        .cloudB      .opC       .arrowhead.eu
//! ```
//!
//! The assembled string becomes the `CN` of the certification request and the
//! alias of the credential store entry.

use std::fmt;

use crate::error::IdentityError;

/// Separator between naming attributes
pub const FIELD_SEPARATOR: char = '.';
/// Domain suffix used when the configuration does not override it
pub const DEFAULT_DOMAIN_SUFFIX: &str = "arrowhead.eu";

/// Validated, ordered set of naming attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityName {
    system_name: String,
    cloud_name: String,
    operator: String,
    domain_suffix: String,
}

impl IdentityName {
    /// Build an identity name from its attributes
    ///
    /// # Errors
    /// - [`IdentityError::EmptyAttribute`] if any attribute is empty
    /// - [`IdentityError::SeparatorInAttribute`] if system, cloud or operator
    ///   contain `.`
    /// - [`IdentityError::InvalidSuffix`] if the suffix has an empty label
    pub fn new(
        system_name: impl Into<String>,
        cloud_name: impl Into<String>,
        operator: impl Into<String>,
        domain_suffix: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let system_name = system_name.into();
        let cloud_name = cloud_name.into();
        let operator = operator.into();
        let domain_suffix = domain_suffix.into();

        check_attribute("system_name", &system_name)?;
        check_attribute("cloud_name", &cloud_name)?;
        check_attribute("operator", &operator)?;

        if domain_suffix.is_empty() {
            return Err(IdentityError::EmptyAttribute {
                attribute: "domain_suffix",
            });
        }
        if domain_suffix.split(FIELD_SEPARATOR).any(str::is_empty) {
            return Err(IdentityError::InvalidSuffix(domain_suffix));
        }

        Ok(Self {
            system_name,
            cloud_name,
            operator,
            domain_suffix,
        })
    }

    /// Build an identity name with the default `arrowhead.eu` suffix
    pub fn with_default_suffix(
        system_name: impl Into<String>,
        cloud_name: impl Into<String>,
        operator: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        Self::new(system_name, cloud_name, operator, DEFAULT_DOMAIN_SUFFIX)
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn domain_suffix(&self) -> &str {
        &self.domain_suffix
    }

    /// Full common name: `system.cloud.operator.suffix`
    pub fn common_name(&self) -> String {
        [
            self.system_name.as_str(),
            self.cloud_name.as_str(),
            self.operator.as_str(),
            self.domain_suffix.as_str(),
        ]
        .join(".")
    }

    /// Common name of the local cloud: `cloud.operator.suffix`
    pub fn cloud_common_name(&self) -> String {
        [
            self.cloud_name.as_str(),
            self.operator.as_str(),
            self.domain_suffix.as_str(),
        ]
        .join(".")
    }
}

impl fmt::Display for IdentityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.common_name())
    }
}

fn check_attribute(attribute: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::EmptyAttribute { attribute });
    }
    if value.contains(FIELD_SEPARATOR) {
        return Err(IdentityError::SeparatorInAttribute {
            attribute,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_name_assembly() {
        let name = IdentityName::with_default_suffix("sysA", "cloudB", "opC").unwrap();
        assert_eq!(name.common_name(), "sysA.cloudB.opC.arrowhead.eu");
        assert_eq!(name.cloud_common_name(), "cloudB.opC.arrowhead.eu");
        assert_eq!(name.to_string(), name.common_name());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let a = IdentityName::new("s", "c", "o", "example.org").unwrap();
        let b = IdentityName::new("s", "c", "o", "example.org").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.common_name(), b.common_name());
    }

    #[test]
    fn test_rejects_empty_attribute() {
        let err = IdentityName::with_default_suffix("", "cloudB", "opC").unwrap_err();
        assert_eq!(
            err,
            IdentityError::EmptyAttribute {
                attribute: "system_name"
            }
        );

        let err = IdentityName::new("sysA", "cloudB", "opC", "").unwrap_err();
        assert_eq!(
            err,
            IdentityError::EmptyAttribute {
                attribute: "domain_suffix"
            }
        );
    }

    #[test]
    fn test_rejects_separator_in_attribute() {
        let err = IdentityName::with_default_suffix("sys.A", "cloudB", "opC").unwrap_err();
        assert!(matches!(
            err,
            IdentityError::SeparatorInAttribute {
                attribute: "system_name",
                ..
            }
        ));

        let err = IdentityName::with_default_suffix("sysA", "cloudB", "op.C").unwrap_err();
        assert!(matches!(
            err,
            IdentityError::SeparatorInAttribute {
                attribute: "operator",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_suffix_with_empty_label() {
        for suffix in [".eu", "arrowhead.", "arrowhead..eu"] {
            let err = IdentityName::new("sysA", "cloudB", "opC", suffix).unwrap_err();
            assert_eq!(err, IdentityError::InvalidSuffix(suffix.to_string()));
        }
    }
}
