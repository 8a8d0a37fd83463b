//! EC2 query-protocol parameters.
//!
//! Lists and structures are flattened into dotted keys with 1-based
//! indexes: `InstanceId.1`, `Filter.2.Value.1`,
//! `TagSpecification.1.Tag.3.Key`.

use crate::{HypervisorError, Result};
use std::collections::BTreeMap;

/// A named filter with its accepted values (`Filter.N.Name` / `Filter.N.Value.M`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

/// Tags requested for resources created by the same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpecification {
    pub resource_type: String,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, String>,
    /// Path prefix, for error messages on nested params.
    prefix: String,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded form/query pairs. Repeated keys keep the last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            prefix: String::new(),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Full parameter name as the client sent it.
    pub fn path(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Value of `key`; empty strings count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| HypervisorError::MissingParameter(self.path(key)))
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    HypervisorError::invalid(self.path(key), format!("'{}': {}", raw, e))
                })
            })
            .transpose()
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(HypervisorError::invalid(
                self.path(key),
                format!("'{}' is not a boolean", v),
            )),
        }
    }

    /// Members of `prefix.N.*`, as nested params ordered by N.
    pub fn indexed(&self, prefix: &str) -> Result<Vec<Params>> {
        let mut groups: BTreeMap<usize, Params> = BTreeMap::new();
        let dotted = format!("{}.", prefix);

        for (key, value) in self.values.range(dotted.clone()..) {
            let Some(rest) = key.strip_prefix(&dotted) else {
                break;
            };
            let (index, tail) = rest.split_once('.').unwrap_or((rest, ""));
            let index = self.index(prefix, index)?;

            let group = groups.entry(index).or_insert_with(|| Params {
                values: BTreeMap::new(),
                prefix: format!("{}{}.{}.", self.prefix, prefix, index),
            });
            group.values.insert(tail.to_string(), value.clone());
        }

        Ok(groups.into_values().collect())
    }

    /// Values of a flat list `prefix.N`, ordered by N.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .indexed(prefix)?
            .into_iter()
            .filter_map(|p| p.values.get("").cloned())
            .filter(|v| !v.is_empty())
            .collect())
    }

    fn index(&self, prefix: &str, raw: &str) -> Result<usize> {
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(HypervisorError::invalid(
                self.path(prefix),
                format!("'{}' is not a valid list index", raw),
            )),
        }
    }

    pub fn filters(&self) -> Result<Vec<Filter>> {
        self.indexed("Filter")?
            .into_iter()
            .map(|f| {
                Ok(Filter {
                    name: f.require("Name")?.to_string(),
                    values: f.list("Value")?,
                })
            })
            .collect()
    }

    /// `prefix.N.Key` / `prefix.N.Value` pairs; a missing value is empty.
    pub fn tags(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.indexed(prefix)?
            .into_iter()
            .map(|t| {
                Ok((
                    t.require("Key")?.to_string(),
                    t.get_or("Value", "").to_string(),
                ))
            })
            .collect()
    }

    /// Like [`tags`](Self::tags) but keeps "no value" distinct from "".
    pub fn tag_keys(&self, prefix: &str) -> Result<Vec<(String, Option<String>)>> {
        self.indexed(prefix)?
            .into_iter()
            .map(|t| {
                Ok((
                    t.require("Key")?.to_string(),
                    t.values.get("Value").cloned(),
                ))
            })
            .collect()
    }

    pub fn tag_specifications(&self) -> Result<Vec<TagSpecification>> {
        self.indexed("TagSpecification")?
            .into_iter()
            .map(|spec| {
                Ok(TagSpecification {
                    resource_type: spec.require("ResourceType")?.to_string(),
                    tags: spec.tags("Tag")?,
                })
            })
            .collect()
    }
}
