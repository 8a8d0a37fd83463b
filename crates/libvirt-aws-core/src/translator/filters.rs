use super::params::Filter;
use crate::{HypervisorError, Result};

/// Validated `Filter.N` conditions for one describe call.
///
/// Filters are AND-ed; the values of one filter are OR-ed and may use the
/// `*` and `?` wildcards.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Accept `supported` attribute names plus `tag:<key>` and `tag-key`.
    pub fn new(filters: Vec<Filter>, supported: &[&str]) -> Result<Self> {
        for filter in &filters {
            let known = supported.contains(&filter.name.as_str())
                || filter.name == "tag-key"
                || filter
                    .name
                    .strip_prefix("tag:")
                    .map(|k| !k.is_empty())
                    .unwrap_or(false);
            if !known {
                return Err(HypervisorError::invalid(
                    "Filter",
                    format!("the filter '{}' is invalid", filter.name),
                ));
            }
            if filter.values.is_empty() {
                return Err(HypervisorError::invalid(
                    "Filter",
                    format!("the filter '{}' has no values", filter.name),
                ));
            }
        }
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// `attribute` maps a filter name to the resource's values for it.
    pub fn matches<F>(&self, attribute: F, tags: &[(String, String)]) -> bool
    where
        F: Fn(&str) -> Vec<String>,
    {
        self.filters.iter().all(|filter| {
            let candidates: Vec<String> = if filter.name == "tag-key" {
                tags.iter().map(|(k, _)| k.clone()).collect()
            } else if let Some(key) = filter.name.strip_prefix("tag:") {
                tags.iter()
                    .filter(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .collect()
            } else {
                attribute(&filter.name)
            };

            candidates
                .iter()
                .any(|c| filter.values.iter().any(|pattern| wildcard_match(pattern, c)))
        })
    }
}

/// EC2 filter patterns: `*` matches any run, `?` one character.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();

    let (mut pi, mut vi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, vi));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, values: &[&str]) -> Filter {
        Filter {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("web-*", "web-1"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("w?b", "web"));
        assert!(wildcard_match("*-prod-*", "eu-prod-7"));
        assert!(!wildcard_match("web-*", "db-1"));
        assert!(!wildcard_match("w?b", "wb"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exactly"));
    }

    #[test]
    fn test_unknown_filter_rejected() {
        assert!(FilterSet::new(vec![filter("flavour", &["x"])], &["status"]).is_err());
        assert!(FilterSet::new(vec![filter("tag:", &["x"])], &["status"]).is_err());
        assert!(FilterSet::new(vec![filter("status", &[])], &["status"]).is_err());
        assert!(FilterSet::new(vec![filter("tag:env", &["x"])], &["status"]).is_ok());
    }

    #[test]
    fn test_matches_attributes_and_tags() {
        let set = FilterSet::new(
            vec![filter("status", &["available", "in-use"]), filter("tag:env", &["prod*"])],
            &["status"],
        )
        .unwrap();

        let tags = vec![("env".to_string(), "production".to_string())];
        let attr = |name: &str| match name {
            "status" => vec!["available".to_string()],
            _ => Vec::new(),
        };
        assert!(set.matches(attr, &tags));
        assert!(!set.matches(attr, &[]));

        let attached = |_: &str| vec!["creating".to_string()];
        assert!(!set.matches(attached, &tags));
    }

    #[test]
    fn test_tag_key_filter() {
        let set = FilterSet::new(vec![filter("tag-key", &["Name"])], &[]).unwrap();
        let tags = vec![("Name".to_string(), String::new())];
        assert!(set.matches(|_| Vec::new(), &tags));
        assert!(!set.matches(|_| Vec::new(), &[]));
    }

    #[test]
    fn test_empty_set_matches_everything() {
        let set = FilterSet::default();
        assert!(set.is_empty());
        assert!(set.matches(|_| Vec::new(), &[]));
    }
}
