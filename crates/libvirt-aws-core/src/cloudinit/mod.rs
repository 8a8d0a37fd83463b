//! cloud-init NoCloud seed images built from RunInstances UserData.

pub mod iso9660;

use crate::{HypervisorError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use iso9660::IsoImage;

/// EC2 limit on decoded user data.
pub const MAX_USER_DATA: usize = 16 * 1024;

/// Label cloud-init looks for when searching for a NoCloud seed.
pub const SEED_LABEL: &str = "cidata";

/// Guest device the seed is attached as.
pub const SEED_DEVICE: &str = "hdd";

/// Decode the base64 `UserData` parameter.
pub fn decode_user_data(encoded: &str) -> Result<Vec<u8>> {
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|e| HypervisorError::invalid("UserData", format!("invalid base64: {}", e)))?;
    if data.len() > MAX_USER_DATA {
        return Err(HypervisorError::invalid(
            "UserData",
            format!("{} bytes exceeds the {} byte limit", data.len(), MAX_USER_DATA),
        ));
    }
    Ok(data)
}

pub fn seed_volume_name(instance_id: &str) -> String {
    format!("{}-cidata.iso", instance_id)
}

/// ISO image holding `user-data` and a `meta-data` naming the instance.
pub fn seed_image(instance_id: &str, hostname: &str, user_data: &[u8], now: DateTime<Utc>) -> Result<Vec<u8>> {
    let meta_data = format!("instance-id: {}\nlocal-hostname: {}\n", instance_id, hostname);
    IsoImage::new(SEED_LABEL)
        .file("meta-data", meta_data)
        .file("user-data", user_data)
        .build(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_user_data() {
        assert_eq!(
            decode_user_data("I2Nsb3VkLWNvbmZpZwo=").unwrap(),
            b"#cloud-config\n".to_vec()
        );
        assert!(decode_user_data("not base64!").unwrap_err().is_client_error());

        let too_big = BASE64.encode(vec![0u8; MAX_USER_DATA + 1]);
        let err = decode_user_data(&too_big).unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidParameter { ref field, .. } if field == "UserData"));
    }

    #[test]
    fn test_seed_image_carries_both_files() {
        let image = seed_image("i-0abc", "i-0abc.internal", b"#!/bin/sh\n", Utc::now()).unwrap();
        let text = String::from_utf8_lossy(&image);
        assert!(text.contains("META-DATA;1"));
        assert!(text.contains("USER-DATA;1"));
        assert!(text.contains("instance-id: i-0abc\nlocal-hostname: i-0abc.internal\n"));
        assert!(text.contains("#!/bin/sh\n"));
        assert_eq!(image.len() % iso9660::SECTOR, 0);
    }
}
