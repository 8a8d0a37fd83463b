use super::instances::ROOT_DEVICE;
use super::{busy, detached, everything, timestamp, FilterSet, Params, Translator};
use crate::hypervisor::{DiskSpec, VolumeSpec};
use crate::ids::{InstanceId, VolumeId};
use crate::store::TryLock;
use crate::volume::{Attachment, Volume, DEFAULT_VOLUME_TYPE, MAX_VOLUME_SIZE_GIB};
use crate::{HypervisorError, Result};
use libvirt_aws_models::{
    CreateVolumeResponse, DescribeVolumesResponse, ReturnResponse, Tag, VolumeAttachmentItem,
    VolumeAttachmentResponse, VolumeItem,
};

const VOLUME_TYPES: &[&str] = &["standard", "gp2", "gp3", "io1", "io2", "st1", "sc1"];

const VOLUME_FILTERS: &[&str] = &[
    "volume-id",
    "status",
    "volume-type",
    "availability-zone",
    "size",
    "attachment.instance-id",
    "attachment.device",
    "attachment.status",
];

fn volume_attribute(volume: &Volume, name: &str) -> Vec<String> {
    let attachment = volume.attachment.as_ref();
    let value = match name {
        "volume-id" => Some(volume.id.to_string()),
        "status" => Some(volume.status().to_string()),
        "volume-type" => Some(volume.volume_type.clone()),
        "availability-zone" => Some(volume.availability_zone.clone()),
        "size" => Some(volume.size_gib.to_string()),
        "attachment.instance-id" => attachment.map(|a| a.instance_id.to_string()),
        "attachment.device" => attachment.map(|a| a.device_path()),
        "attachment.status" => attachment.map(|_| "attached".to_string()),
        _ => None,
    };
    value.into_iter().collect()
}

/// `/dev/sdf` -> `sdf`. Relative names are taken as they are.
fn strip_dev(raw: &str) -> Result<String> {
    if raw.starts_with('/') {
        raw.strip_prefix("/dev/")
            .filter(|d| !d.is_empty())
            .map(|d| d.to_string())
            .ok_or_else(|| {
                HypervisorError::invalid("Device", format!("'{}' must start with /dev/", raw))
            })
    } else {
        Ok(raw.to_string())
    }
}

/// Virtio target for a requested device: `sdf`, `xvdf` and `vdf` all map
/// to `vdf`.
fn guest_target(device: &str) -> Result<String> {
    let letters = device
        .strip_prefix("xvd")
        .or_else(|| device.strip_prefix("sd"))
        .or_else(|| device.strip_prefix("vd"))
        .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_lowercase()))
        .ok_or_else(|| {
            HypervisorError::invalid("Device", format!("'{}' is not a valid device name", device))
        })?;

    let target = format!("vd{}", letters);
    if target == ROOT_DEVICE {
        return Err(HypervisorError::invalid(
            "Device",
            format!("'{}' is reserved for the root disk", device),
        ));
    }
    Ok(target)
}

/// Disk serial the guest sees, e.g. `vol0123456789abcdef0` (20 chars).
fn disk_serial(id: &VolumeId) -> String {
    id.as_str().replace('-', "")
}

fn attachment_item(volume: &Volume, attachment: &Attachment, status: &str) -> VolumeAttachmentItem {
    VolumeAttachmentItem {
        volume_id: volume.id.to_string(),
        instance_id: attachment.instance_id.to_string(),
        device: attachment.device_path(),
        status: status.to_string(),
        attach_time: timestamp(&attachment.attached_at),
        delete_on_termination: false,
    }
}

impl Translator {
    pub async fn create_volume(&self, params: &Params) -> Result<CreateVolumeResponse> {
        let size = params
            .parse::<u64>("Size")?
            .ok_or_else(|| HypervisorError::MissingParameter("Size".to_string()))?;
        if size == 0 || size > MAX_VOLUME_SIZE_GIB {
            return Err(HypervisorError::invalid(
                "Size",
                format!("must be between 1 and {} GiB", MAX_VOLUME_SIZE_GIB),
            ));
        }

        let zone = params.require("AvailabilityZone")?.to_string();
        self.settings.check_zone("AvailabilityZone", &zone)?;

        let volume_type = params.get_or("VolumeType", DEFAULT_VOLUME_TYPE).to_string();
        if !VOLUME_TYPES.contains(&volume_type.as_str()) {
            return Err(HypervisorError::invalid(
                "VolumeType",
                format!("'{}' is not a supported volume type", volume_type),
            ));
        }

        let mut tags = Vec::new();
        for spec in params.tag_specifications()? {
            if spec.resource_type != "volume" {
                return Err(HypervisorError::invalid(
                    "TagSpecification.ResourceType",
                    format!("'{}' cannot be tagged by CreateVolume", spec.resource_type),
                ));
            }
            tags.extend(spec.tags);
        }

        let this = self.clone();
        let volume = detached(async move {
            let id = VolumeId::generate();
            let spec = VolumeSpec::qcow2(&this.settings.pool, &format!("{}.qcow2", id), size);
            let handle = this.blocking(move |hv| hv.create_volume(&spec)).await?;

            let volume = Volume::new(id.clone(), handle, size, volume_type, zone);
            this.store.volumes.put(id.clone(), volume.clone())?;
            if !tags.is_empty() {
                if let Err(e) = this.tags.set_tags(id.as_str(), "volume", &tags) {
                    tracing::warn!("Failed to tag {}: {}", id, e);
                }
            }

            tracing::info!("Created volume {} ({} GiB, {})", id, size, volume.volume_type);
            Ok(volume)
        })
        .await?;

        self.volume_item(&volume)
    }

    pub async fn delete_volume(&self, params: &Params) -> Result<ReturnResponse> {
        let id = VolumeId::parse(params.require("VolumeId")?)?;

        let guard = match self.store.volumes.try_lock(&id)? {
            TryLock::Acquired(guard) => guard,
            TryLock::Busy(published) => return Err(busy(&id, published.status(), "delete")),
        };
        if guard.current().attachment.is_some() {
            return Err(HypervisorError::VolumeInUse(id.to_string()));
        }

        let this = self.clone();
        detached(async move {
            let handle = guard.current().handle.clone();
            this.blocking(move |hv| hv.delete_volume(&handle)).await?;
            this.store.volumes.remove_locked(guard);
            if let Err(e) = this.tags.delete_all(id.as_str()) {
                tracing::warn!("Failed to drop tags of {}: {}", id, e);
            }
            tracing::info!("Deleted volume {}", id);
            Ok(())
        })
        .await?;

        Ok(ReturnResponse { result: true })
    }

    pub async fn describe_volumes(&self, params: &Params) -> Result<DescribeVolumesResponse> {
        let raw = params.list("VolumeId")?;
        let ids = raw
            .iter()
            .enumerate()
            .map(|(n, v)| VolumeId::parse_field(v, &format!("VolumeId.{}", n + 1)))
            .collect::<Result<Vec<_>>>()?;
        let filters = FilterSet::new(params.filters()?, VOLUME_FILTERS)?;

        let listing = if ids.is_empty() {
            self.store.volumes.list(everything)
        } else {
            self.store.volumes.list_ids(&ids, everything)
        };

        let targets: Vec<VolumeId> = listing.ids().cloned().collect();
        self.refresh_attachments(&targets);

        let mut items = Vec::new();
        for volume in listing.iter() {
            let tags = self.tags.tags_for(volume.id.as_str())?;
            if filters.matches(|name| volume_attribute(&volume, name), &tags) {
                items.push(self.volume_item_with_tags(&volume, tags));
            }
        }

        Ok(DescribeVolumesResponse {
            volume_set: items.into(),
        })
    }

    /// Drop attachments whose instance is gone or terminated. Volumes with
    /// an operation in flight are left alone.
    fn refresh_attachments(&self, ids: &[VolumeId]) {
        for id in ids {
            let mut guard = match self.store.volumes.try_lock(id) {
                Ok(TryLock::Acquired(guard)) => guard,
                Ok(TryLock::Busy(_)) | Err(_) => continue,
            };
            let Some(instance_id) = guard.current().attachment.as_ref().map(|a| a.instance_id.clone())
            else {
                continue;
            };

            let stale = match self.store.instances.get(&instance_id) {
                Ok(instance) => instance.is_terminated(),
                Err(_) => true,
            };
            if stale {
                tracing::info!("Clearing stale attachment of {} to {}", id, instance_id);
                guard.apply(|v| v.attachment = None);
            }
        }
    }

    pub async fn attach_volume(&self, params: &Params) -> Result<VolumeAttachmentResponse> {
        let volume_id = VolumeId::parse(params.require("VolumeId")?)?;
        let instance_id = InstanceId::parse(params.require("InstanceId")?)?;
        let device = strip_dev(params.require("Device")?)?;
        let target = guest_target(&device)?;

        // Volume first, then instance; never the other way round.
        let mut volume = match self.store.volumes.try_lock(&volume_id)? {
            TryLock::Acquired(guard) => guard,
            TryLock::Busy(published) => return Err(busy(&volume_id, published.status(), "attach")),
        };
        if volume.current().attachment.is_some() {
            return Err(busy(&volume_id, volume.current().status(), "attach"));
        }

        let instance = match self.store.instances.try_lock(&instance_id)? {
            TryLock::Acquired(guard) => guard,
            TryLock::Busy(published) => {
                return Err(busy(&instance_id, published.state.name(), "attach a volume to"))
            }
        };
        if instance.current().is_terminated() {
            return Err(busy(&instance_id, instance.current().state.name(), "attach a volume to"));
        }

        let taken = self
            .store
            .volumes
            .list(|v| {
                v.attachment.as_ref().is_some_and(|a| {
                    a.instance_id == instance_id && guest_target(&a.device).ok().as_deref() == Some(target.as_str())
                })
            })
            .iter()
            .next()
            .is_some();
        if taken {
            return Err(HypervisorError::invalid(
                "Device",
                format!("'{}' is already in use on {}", device, instance_id),
            ));
        }

        let this = self.clone();
        detached(async move {
            let disk = DiskSpec::volume(
                &volume.current().handle.pool,
                &volume.current().handle.name,
                &target,
            )
            .with_serial(disk_serial(&volume_id));
            let domain = instance.current().domain.clone();
            this.blocking(move |hv| hv.attach_disk(&domain, &disk)).await?;

            volume.apply(|v| v.attachment = Some(Attachment::new(instance_id.clone(), device)));
            drop(instance);

            tracing::info!("Attached {} to {}", volume_id, instance_id);

            let current = volume.current();
            let attachment = current
                .attachment
                .as_ref()
                .ok_or_else(|| HypervisorError::Backend("attachment was not recorded".to_string()))?;
            Ok(attachment_item(current, attachment, "attaching"))
        })
        .await
    }

    /// Detaching a volume that is not attached succeeds without doing anything.
    pub async fn detach_volume(&self, params: &Params) -> Result<VolumeAttachmentResponse> {
        let volume_id = VolumeId::parse(params.require("VolumeId")?)?;
        let requested = params
            .get("InstanceId")
            .map(InstanceId::parse)
            .transpose()?;

        let mut volume = match self.store.volumes.try_lock(&volume_id)? {
            TryLock::Acquired(guard) => guard,
            TryLock::Busy(published) => return Err(busy(&volume_id, published.status(), "detach")),
        };

        let Some(attachment) = volume.current().attachment.clone() else {
            return Ok(VolumeAttachmentItem {
                volume_id: volume_id.to_string(),
                instance_id: requested.map(|i| i.to_string()).unwrap_or_default(),
                device: params
                    .get("Device")
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                status: "detached".to_string(),
                attach_time: String::new(),
                delete_on_termination: false,
            });
        };

        if let Some(requested) = &requested {
            if requested != &attachment.instance_id {
                return Err(HypervisorError::AttachmentNotFound {
                    volume: volume_id.to_string(),
                    instance: requested.to_string(),
                });
            }
        }

        let instance = match self.store.instances.try_lock(&attachment.instance_id) {
            Ok(TryLock::Acquired(guard)) => Some(guard),
            Ok(TryLock::Busy(published)) => {
                return Err(busy(
                    &attachment.instance_id,
                    published.state.name(),
                    "detach a volume from",
                ))
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let target = guest_target(&attachment.device)?;
        let this = self.clone();
        detached(async move {
            // A terminated or vanished instance has no disk left to unplug.
            if let Some(instance) = instance.as_ref().filter(|g| !g.current().is_terminated()) {
                let disk = DiskSpec::volume(
                    &volume.current().handle.pool,
                    &volume.current().handle.name,
                    &target,
                );
                let domain = instance.current().domain.clone();
                match this.blocking(move |hv| hv.detach_disk(&domain, &disk)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        tracing::warn!("Domain of {} is gone, clearing attachment", attachment.instance_id);
                    }
                    Err(e) => return Err(e),
                }
            }

            volume.apply(|v| v.attachment = None);
            drop(instance);

            tracing::info!("Detached {} from {}", volume_id, attachment.instance_id);
            Ok(attachment_item(volume.current(), &attachment, "detaching"))
        })
        .await
    }

    fn volume_item(&self, volume: &Volume) -> Result<VolumeItem> {
        let tags = self.tags.tags_for(volume.id.as_str())?;
        Ok(self.volume_item_with_tags(volume, tags))
    }

    fn volume_item_with_tags(&self, volume: &Volume, tags: Vec<(String, String)>) -> VolumeItem {
        let attachments: Vec<VolumeAttachmentItem> = volume
            .attachment
            .iter()
            .map(|a| attachment_item(volume, a, "attached"))
            .collect();

        VolumeItem {
            volume_id: volume.id.to_string(),
            size: volume.size_gib,
            availability_zone: volume.availability_zone.clone(),
            status: volume.status().to_string(),
            create_time: timestamp(&volume.created_at),
            volume_type: volume.volume_type.clone(),
            iops: volume.iops(),
            encrypted: false,
            multi_attach_enabled: false,
            attachment_set: attachments.into(),
            tag_set: tags
                .into_iter()
                .map(|(key, value)| Tag { key, value })
                .collect::<Vec<_>>()
                .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_dev() {
        assert_eq!(strip_dev("/dev/sdf").unwrap(), "sdf");
        assert_eq!(strip_dev("xvdg").unwrap(), "xvdg");
        assert!(strip_dev("/mnt/sdf").is_err());
        assert!(strip_dev("/dev/").is_err());
    }

    #[test]
    fn test_guest_target() {
        assert_eq!(guest_target("sdf").unwrap(), "vdf");
        assert_eq!(guest_target("xvdf").unwrap(), "vdf");
        assert_eq!(guest_target("vdaa").unwrap(), "vdaa");
        assert!(guest_target("sda").is_err());
        assert!(guest_target("nvme0n1").is_err());
        assert!(guest_target("sd").is_err());
        assert!(guest_target("sdF").is_err());
    }

    #[test]
    fn test_disk_serial_fits_virtio_limit() {
        let serial = disk_serial(&VolumeId::generate());
        assert!(serial.starts_with("vol"));
        assert_eq!(serial.len(), 20);
    }
}
