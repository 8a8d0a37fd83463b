use super::Action;
use crate::error::ApiResult;
use crate::xml;
use libvirt_aws_core::translator::{Params, Translator};

/// Run one action and return the response body elements.
pub async fn dispatch(translator: &Translator, action: Action, params: &Params) -> ApiResult<String> {
    match action {
        Action::RunInstances => xml::body(&translator.run_instances(params).await?),
        Action::DescribeInstances => xml::body(&translator.describe_instances(params).await?),
        Action::StartInstances => xml::body(&translator.start_instances(params).await?),
        Action::StopInstances => xml::body(&translator.stop_instances(params).await?),
        Action::TerminateInstances => xml::body(&translator.terminate_instances(params).await?),
        Action::DescribeImages => xml::body(&translator.describe_images(params).await?),
        Action::CreateVolume => xml::body(&translator.create_volume(params).await?),
        Action::DeleteVolume => xml::body(&translator.delete_volume(params).await?),
        Action::DescribeVolumes => xml::body(&translator.describe_volumes(params).await?),
        Action::AttachVolume => xml::body(&translator.attach_volume(params).await?),
        Action::DetachVolume => xml::body(&translator.detach_volume(params).await?),
        Action::DescribeAvailabilityZones => {
            xml::body(&translator.describe_availability_zones(params).await?)
        }
        Action::CreateTags => xml::body(&translator.create_tags(params).await?),
        Action::DeleteTags => xml::body(&translator.delete_tags(params).await?),
        Action::DescribeTags => xml::body(&translator.describe_tags(params).await?),
    }
}
