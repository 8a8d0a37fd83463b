use serde::{Deserialize, Serialize};

// ============================================================================
// Shared Types
// ============================================================================

/// EC2 renders every list as `<fooSet><item>..</item></fooSet>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> ItemSet<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<Vec<T>> for ItemSet<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnResponse {
    #[serde(rename = "return")]
    pub result: bool,
}

// ============================================================================
// Response Types - Instances
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStateInfo {
    pub code: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuOptions {
    pub core_count: u32,
    pub threads_per_core: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReason {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbsInstanceBlockDevice {
    pub volume_id: String,
    pub status: String,
    pub attach_time: String,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub ebs: EbsInstanceBlockDevice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceAttachment {
    pub attachment_id: String,
    pub device_index: u32,
    pub status: String,
    pub attach_time: String,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateIpAddressItem {
    pub private_ip_address: String,
    pub private_dns_name: String,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNetworkInterface {
    pub network_interface_id: String,
    pub owner_id: String,
    pub status: String,
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_ip_address: Option<String>,
    pub private_dns_name: String,
    pub attachment: NetworkInterfaceAttachment,
    #[serde(default)]
    pub private_ip_addresses_set: ItemSet<PrivateIpAddressItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceItem {
    pub instance_id: String,
    pub image_id: String,
    pub instance_state: InstanceStateInfo,
    pub private_dns_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_ip_address: Option<String>,
    pub instance_type: String,
    pub launch_time: String,
    pub placement: Placement,
    pub cpu_options: CpuOptions,
    /// Not part of the EC2 schema; lets clients see the exact memory size
    /// when a custom instance type is in use.
    #[serde(rename = "memoryMiB")]
    pub memory_mib: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_reason: Option<StateReason>,
    #[serde(default)]
    pub block_device_mapping: ItemSet<BlockDeviceMapping>,
    #[serde(default)]
    pub network_interface_set: ItemSet<InstanceNetworkInterface>,
    #[serde(default)]
    pub tag_set: ItemSet<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub reservation_id: String,
    pub owner_id: String,
    pub instances_set: ItemSet<InstanceItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInstancesResponse {
    pub reservation_id: String,
    pub owner_id: String,
    pub instances_set: ItemSet<InstanceItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeInstancesResponse {
    pub reservation_set: ItemSet<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStateChange {
    pub instance_id: String,
    pub current_state: InstanceStateInfo,
    pub previous_state: InstanceStateInfo,
}

/// Shared by StartInstances, StopInstances and TerminateInstances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStateChangeResponse {
    pub instances_set: ItemSet<InstanceStateChange>,
}

// ============================================================================
// Response Types - Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    pub image_id: String,
    pub image_location: String,
    pub image_state: String,
    pub image_owner_id: String,
    pub is_public: bool,
    pub architecture: String,
    pub image_type: String,
    pub name: String,
    pub root_device_type: String,
    pub root_device_name: String,
    pub virtualization_type: String,
    pub hypervisor: String,
    /// Not part of the EC2 schema; virtual size of the image volume.
    #[serde(rename = "sizeGiB")]
    pub size_gib: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeImagesResponse {
    pub images_set: ItemSet<ImageItem>,
}

// ============================================================================
// Response Types - Volumes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachmentItem {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
    pub status: String,
    pub attach_time: String,
    pub delete_on_termination: bool,
}

/// Shared by AttachVolume and DetachVolume.
pub type VolumeAttachmentResponse = VolumeAttachmentItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeItem {
    pub volume_id: String,
    pub size: u64,
    pub availability_zone: String,
    pub status: String,
    pub create_time: String,
    pub volume_type: String,
    pub iops: u32,
    pub encrypted: bool,
    pub multi_attach_enabled: bool,
    #[serde(default)]
    pub attachment_set: ItemSet<VolumeAttachmentItem>,
    #[serde(default)]
    pub tag_set: ItemSet<Tag>,
}

pub type CreateVolumeResponse = VolumeItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeVolumesResponse {
    pub volume_set: ItemSet<VolumeItem>,
}

// ============================================================================
// Response Types - Regions & Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityZoneItem {
    pub zone_name: String,
    pub zone_id: String,
    pub zone_state: String,
    pub region_name: String,
    pub opt_in_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeAvailabilityZonesResponse {
    pub availability_zone_info: ItemSet<AvailabilityZoneItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDescription {
    pub resource_id: String,
    pub resource_type: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTagsResponse {
    pub tag_set: ItemSet<TagDescription>,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "Response")]
pub struct ErrorResponse {
    #[serde(rename = "Errors")]
    pub errors: ErrorList,
    #[serde(rename = "RequestID")]
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorList {
    #[serde(rename = "Error")]
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}
