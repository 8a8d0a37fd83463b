use super::{Params, Translator};
use crate::{HypervisorError, Result};
use libvirt_aws_models::{AvailabilityZoneItem, DescribeAvailabilityZonesResponse};

impl Translator {
    /// The three zones of the configured region, optionally narrowed by
    /// `ZoneName.N`.
    pub async fn describe_availability_zones(
        &self,
        params: &Params,
    ) -> Result<DescribeAvailabilityZonesResponse> {
        let zones = self.settings.zones();
        let requested = params.list("ZoneName")?;
        if let Some(unknown) = requested.iter().find(|name| !zones.contains(*name)) {
            return Err(HypervisorError::invalid(
                "ZoneName",
                format!("'{}' is not an availability zone of {}", unknown, self.settings.region),
            ));
        }

        let items = zones
            .iter()
            .enumerate()
            .filter(|(_, name)| requested.is_empty() || requested.contains(*name))
            .map(|(n, name)| AvailabilityZoneItem {
                zone_name: name.clone(),
                zone_id: format!("{}-az{}", self.settings.region, n + 1),
                zone_state: "available".to_string(),
                region_name: self.settings.region.clone(),
                opt_in_status: "opt-in-not-required".to_string(),
            })
            .collect::<Vec<_>>();

        Ok(DescribeAvailabilityZonesResponse {
            availability_zone_info: items.into(),
        })
    }
}
