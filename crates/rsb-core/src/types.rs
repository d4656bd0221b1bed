//! Shared types used across the broker.
//!
//! This module defines the validated identifier newtypes, the request
//! context supplied by the platform, and timestamp handling.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Opaque caller-supplied parameters attached to instances and bindings.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Platform value that carries the extra IBM Cloud context fields.
pub const IBM_CLOUD_PLATFORM: &str = "ibmcloud";

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._~:-]{1,255}$").expect("valid regex"))
}

/// Validate an identifier: 1-255 characters of `[A-Za-z0-9._~:-]`.
fn validate_identifier(kind: &str, id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(format!("{kind} cannot be empty")));
    }

    if identifier_regex().is_match(id) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "invalid {kind}: must be 1-255 characters of [A-Za-z0-9._~:-], got '{id}'"
        )))
    }
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            ///
            /// # Errors
            /// Returns error if the identifier is empty or contains invalid characters.
            pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
                let id = id.into();
                validate_identifier($kind, &id)?;
                Ok(Self(id))
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

identifier!(
    /// Caller-supplied, globally unique service instance identifier.
    InstanceId,
    "instance id"
);

identifier!(
    /// Caller-supplied binding identifier, unique within its owning instance.
    BindingId,
    "binding id"
);

identifier!(
    /// Service offering identifier from the catalog.
    ServiceId,
    "service id"
);

identifier!(
    /// Plan identifier from the catalog.
    PlanId,
    "plan id"
);

/// Platform context sent with provision and update requests.
///
/// When `platform` is `ibmcloud` the account and CRN fields are required.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Platform the request originates from (e.g. `ibmcloud`, `cloudfoundry`)
    pub platform: String,
    /// IBM Cloud account identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Cloud resource name of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crn: Option<String>,
    /// Cloud resource name of the owning resource group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_crn: Option<String>,
    /// Cloud resource name of the deployment target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_crn: Option<String>,
    /// Platform-specific fields not modelled above
    #[serde(flatten)]
    pub extra: Parameters,
}

impl RequestContext {
    /// Create a context for the given platform.
    #[must_use]
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Self::default()
        }
    }

    /// Create a fully populated IBM Cloud context.
    #[must_use]
    pub fn ibm_cloud(
        account_id: impl Into<String>,
        crn: impl Into<String>,
        resource_group_crn: impl Into<String>,
        target_crn: impl Into<String>,
    ) -> Self {
        Self {
            platform: IBM_CLOUD_PLATFORM.to_string(),
            account_id: Some(account_id.into()),
            crn: Some(crn.into()),
            resource_group_crn: Some(resource_group_crn.into()),
            target_crn: Some(target_crn.into()),
            extra: Parameters::new(),
        }
    }

    /// Validate that required fields are present and non-blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.platform.trim().is_empty() {
            return Err(CoreError::Validation(
                "context.platform cannot be empty".to_string(),
            ));
        }

        if self.platform == IBM_CLOUD_PLATFORM {
            let required = [
                ("account_id", &self.account_id),
                ("crn", &self.crn),
                ("resource_group_crn", &self.resource_group_crn),
                ("target_crn", &self.target_crn),
            ];

            for (field, value) in required {
                match value {
                    Some(v) if !v.trim().is_empty() => {}
                    Some(_) => {
                        return Err(CoreError::Validation(format!(
                            "context.{field} cannot be empty"
                        )))
                    }
                    None => {
                        return Err(CoreError::Validation(format!(
                            "context.{field} not found"
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

/// Identity of the platform user on whose behalf a request is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginatingIdentity {
    /// Platform that authenticated the user
    pub platform: String,
    /// Platform-specific identity payload
    pub value: serde_json::Value,
}

impl OriginatingIdentity {
    /// Create an originating identity.
    #[must_use]
    pub fn new(platform: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            platform: platform.into(),
            value,
        }
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, CoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
