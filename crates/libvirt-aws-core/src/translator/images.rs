use super::instances::ROOT_DEVICE;
use super::{FilterSet, Params, Translator, OWNER_ID};
use crate::hypervisor::VolumeSpec;
use crate::{HypervisorError, Result};
use libvirt_aws_models::{DescribeImagesResponse, ImageItem};

const IMAGE_FILTERS: &[&str] = &["image-id", "name", "state", "image-type", "architecture"];

/// Volumes the emulator creates itself: EBS volumes and cloud-init seeds.
const MANAGED_PREFIXES: &[&str] = &["vol-", "i-"];

/// Every other volume in the pool is a bootable image, named by its
/// volume name.
fn is_image(volume: &VolumeSpec) -> bool {
    !MANAGED_PREFIXES.iter().any(|p| volume.name.starts_with(p))
}

fn image_attribute(image: &ImageItem, name: &str) -> Vec<String> {
    let value = match name {
        "image-id" => &image.image_id,
        "name" => &image.name,
        "state" => &image.image_state,
        "image-type" => &image.image_type,
        "architecture" => &image.architecture,
        _ => return Vec::new(),
    };
    vec![value.clone()]
}

fn owned_by_us(owners: &[String]) -> bool {
    owners.is_empty() || owners.iter().any(|o| o == "self" || o == OWNER_ID)
}

impl Translator {
    pub async fn describe_images(&self, params: &Params) -> Result<DescribeImagesResponse> {
        let requested = params.list("ImageId")?;
        let owners = params.list("Owner")?;
        let filters = FilterSet::new(params.filters()?, IMAGE_FILTERS)?;

        let pool = self.settings.pool.clone();
        let volumes = self.blocking(move |hv| hv.list_volumes(&pool)).await?;
        let images: Vec<ImageItem> = volumes
            .iter()
            .filter(|v| is_image(v))
            .map(|v| self.image_item(v))
            .collect();

        if let Some(missing) = requested
            .iter()
            .find(|id| !images.iter().any(|i| &i.image_id == *id))
        {
            return Err(HypervisorError::ImageNotFound(missing.clone()));
        }

        let items: Vec<ImageItem> = images
            .into_iter()
            .filter(|i| requested.is_empty() || requested.contains(&i.image_id))
            .filter(|_| owned_by_us(&owners))
            .filter(|i| filters.matches(|name| image_attribute(i, name), &[]))
            .collect();

        Ok(DescribeImagesResponse {
            images_set: items.into(),
        })
    }

    fn image_item(&self, volume: &VolumeSpec) -> ImageItem {
        ImageItem {
            image_id: volume.name.clone(),
            image_location: format!("{}/{}", volume.pool, volume.name),
            image_state: "available".to_string(),
            image_owner_id: OWNER_ID.to_string(),
            is_public: false,
            architecture: "x86_64".to_string(),
            image_type: "machine".to_string(),
            name: volume.name.clone(),
            root_device_type: "instance-store".to_string(),
            root_device_name: format!("/dev/{}", ROOT_DEVICE),
            virtualization_type: "hvm".to_string(),
            hypervisor: "kvm".to_string(),
            size_gib: volume.capacity_gib(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_volumes_are_not_images() {
        assert!(is_image(&VolumeSpec::qcow2("default", "ubuntu-22.04.qcow2", 10)));
        assert!(!is_image(&VolumeSpec::qcow2("default", "vol-0123456789abcdef0.qcow2", 1)));
        assert!(!is_image(&VolumeSpec::raw("default", "i-0123456789abcdef0-cidata.iso", 4096)));
    }

    #[test]
    fn test_owner_filter() {
        assert!(owned_by_us(&[]));
        assert!(owned_by_us(&["self".to_string()]));
        assert!(owned_by_us(&["amazon".to_string(), OWNER_ID.to_string()]));
        assert!(!owned_by_us(&["amazon".to_string()]));
    }
}
