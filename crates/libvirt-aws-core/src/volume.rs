use crate::{
    hypervisor::VolumeHandle,
    ids::{InstanceId, VolumeId},
};

pub const DEFAULT_VOLUME_TYPE: &str = "gp2";
pub const MAX_VOLUME_SIZE_GIB: u64 = 16384;

/// Link from a volume to the instance it is plugged into.
///
/// The volume does not own the instance; the reference is dropped when the
/// instance goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub instance_id: InstanceId,
    /// Device name as requested, without the `/dev/` prefix, e.g. `sdf`.
    pub device: String,
    pub attached_at: chrono::DateTime<chrono::Utc>,
}

impl Attachment {
    pub fn new(instance_id: InstanceId, device: impl Into<String>) -> Self {
        Self {
            instance_id,
            device: device.into(),
            attached_at: chrono::Utc::now(),
        }
    }

    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.device)
    }
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub id: VolumeId,
    pub handle: VolumeHandle,
    pub size_gib: u64,
    pub volume_type: String,
    pub availability_zone: String,
    pub attachment: Option<Attachment>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Volume {
    pub fn new(
        id: VolumeId,
        handle: VolumeHandle,
        size_gib: u64,
        volume_type: impl Into<String>,
        availability_zone: impl Into<String>,
    ) -> Self {
        Self {
            id,
            handle,
            size_gib,
            volume_type: volume_type.into(),
            availability_zone: availability_zone.into(),
            attachment: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.attachment.is_some() {
            "in-use"
        } else {
            "available"
        }
    }

    pub fn is_attached_to(&self, instance_id: &InstanceId) -> bool {
        self.attachment
            .as_ref()
            .map(|a| &a.instance_id == instance_id)
            .unwrap_or(false)
    }

    /// gp2 baseline: 3 IOPS per GiB, floor 100, cap 16000.
    pub fn iops(&self) -> u32 {
        (self.size_gib * 3).clamp(100, 16000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(size_gib: u64) -> Volume {
        Volume::new(
            VolumeId::generate(),
            VolumeHandle {
                pool: "default".to_string(),
                name: "v.qcow2".to_string(),
            },
            size_gib,
            DEFAULT_VOLUME_TYPE,
            "us-east-2a",
        )
    }

    #[test]
    fn test_status_follows_attachment() {
        let mut v = volume(8);
        assert_eq!(v.status(), "available");

        let instance = InstanceId::generate();
        v.attachment = Some(Attachment::new(instance.clone(), "vdb"));
        assert_eq!(v.status(), "in-use");
        assert!(v.is_attached_to(&instance));
        assert!(!v.is_attached_to(&InstanceId::generate()));
        assert_eq!(v.attachment.as_ref().unwrap().device_path(), "/dev/vdb");
    }

    #[test]
    fn test_iops_bounds() {
        assert_eq!(volume(1).iops(), 100);
        assert_eq!(volume(100).iops(), 300);
        assert_eq!(volume(MAX_VOLUME_SIZE_GIB).iops(), 16000);
    }
}
