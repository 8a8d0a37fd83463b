use crate::{HypervisorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex digits after the prefix, matching the long-form EC2 ids.
const ID_HEX_LEN: usize = 17;

fn generate(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &hex[..ID_HEX_LEN])
}

fn validate(prefix: &str, field: &str, raw: &str) -> Result<()> {
    let rest = raw
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(|| {
            HypervisorError::invalid(field, format!("'{}' must start with '{}-'", raw, prefix))
        })?;

    let well_formed = !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric());
    if !well_formed {
        return Err(HypervisorError::invalid(
            field,
            format!("'{}' is not a valid identifier", raw),
        ));
    }

    Ok(())
}

macro_rules! resource_id {
    ($name:ident, $prefix:literal, $field:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn generate() -> Self {
                Self(generate($prefix))
            }

            /// Parse a client-supplied id, naming `field` in the error.
            pub fn parse_field(raw: &str, field: &str) -> Result<Self> {
                validate($prefix, field, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn parse(raw: &str) -> Result<Self> {
                Self::parse_field(raw, $field)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

resource_id!(InstanceId, "i", "InstanceId");
resource_id!(VolumeId, "vol", "VolumeId");
