use super::{Params, Translator};
use crate::ids::{InstanceId, VolumeId};
use crate::store::TagQuery;
use crate::{HypervisorError, Result};
use libvirt_aws_models::{DescribeTagsResponse, ReturnResponse, TagDescription};

const MAX_KEY_LEN: usize = 128;
const MAX_VALUE_LEN: usize = 256;

fn check_tag(key: &str, value: &str) -> Result<()> {
    if key.starts_with("aws:") {
        return Err(HypervisorError::invalid(
            "Tag.Key",
            format!("'{}' uses the reserved aws: prefix", key),
        ));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(HypervisorError::invalid(
            "Tag.Key",
            format!("keys are limited to {} characters", MAX_KEY_LEN),
        ));
    }
    if value.chars().count() > MAX_VALUE_LEN {
        return Err(HypervisorError::invalid(
            "Tag.Value",
            format!("values are limited to {} characters", MAX_VALUE_LEN),
        ));
    }
    Ok(())
}

impl Translator {
    /// Resource type of an existing taggable resource.
    fn resource_type(&self, raw: &str, field: &str) -> Result<&'static str> {
        if raw.starts_with("vol-") {
            let id = VolumeId::parse_field(raw, field)?;
            self.store.volumes.get(&id)?;
            Ok("volume")
        } else if raw.starts_with("i-") {
            let id = InstanceId::parse_field(raw, field)?;
            self.store.instances.get(&id)?;
            Ok("instance")
        } else {
            Err(HypervisorError::invalid(
                field,
                format!("'{}' is not a taggable resource", raw),
            ))
        }
    }

    fn tagged_resources(&self, params: &Params) -> Result<Vec<(String, &'static str)>> {
        let ids = params.list("ResourceId")?;
        if ids.is_empty() {
            return Err(HypervisorError::MissingParameter("ResourceId.1".to_string()));
        }
        ids.into_iter()
            .enumerate()
            .map(|(n, id)| {
                let kind = self.resource_type(&id, &format!("ResourceId.{}", n + 1))?;
                Ok((id, kind))
            })
            .collect()
    }

    pub async fn create_tags(&self, params: &Params) -> Result<ReturnResponse> {
        let resources = self.tagged_resources(params)?;
        let tags = params.tags("Tag")?;
        if tags.is_empty() {
            return Err(HypervisorError::MissingParameter("Tag.1.Key".to_string()));
        }
        for (key, value) in &tags {
            check_tag(key, value)?;
        }

        for (id, kind) in &resources {
            self.tags.set_tags(id, kind, &tags)?;
            tracing::debug!("Tagged {} with {} tag(s)", id, tags.len());
        }
        Ok(ReturnResponse { result: true })
    }

    /// Without any `Tag.N` every tag of the listed resources is removed.
    pub async fn delete_tags(&self, params: &Params) -> Result<ReturnResponse> {
        let resources = self.tagged_resources(params)?;
        let keys = params.tag_keys("Tag")?;

        for (id, _) in &resources {
            if keys.is_empty() {
                self.tags.delete_all(id)?;
            } else {
                self.tags.delete_tags(id, &keys)?;
            }
        }
        Ok(ReturnResponse { result: true })
    }

    pub async fn describe_tags(&self, params: &Params) -> Result<DescribeTagsResponse> {
        let mut query = TagQuery::default();
        for filter in params.filters()? {
            let target = match filter.name.as_str() {
                "resource-id" => &mut query.resource_ids,
                "resource-type" => &mut query.resource_types,
                "key" => &mut query.keys,
                "value" => &mut query.values,
                other => {
                    return Err(HypervisorError::invalid(
                        "Filter",
                        format!("the filter '{}' is invalid", other),
                    ))
                }
            };
            target.extend(filter.values);
        }

        let tags = self
            .tags
            .describe(&query)?
            .into_iter()
            .map(|t| TagDescription {
                resource_id: t.resource_id,
                resource_type: t.resource_type,
                key: t.key,
                value: t.value,
            })
            .collect::<Vec<_>>();

        Ok(DescribeTagsResponse {
            tag_set: tags.into(),
        })
    }
}
