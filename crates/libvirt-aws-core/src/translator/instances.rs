use super::{busy, detached, everything, timestamp, FilterSet, Params, RetentionPolicy, Translator, OWNER_ID};
use crate::cloudinit::{self, SEED_DEVICE};
use crate::hypervisor::{
    DesiredState, DiskSpec, DomainHandle, DomainSpec, InterfaceAddress, InterfaceSpec, VolumeHandle,
    VolumeSpec,
};
use crate::ids::InstanceId;
use crate::instance::{Instance, InstanceState, NetworkInterface, ResourceSpec, DEFAULT_INSTANCE_TYPE};
use crate::store::{RecordGuard, TryLock};
use crate::{HypervisorError, Result};
use libvirt_aws_models::{
    BlockDeviceMapping, CpuOptions, DescribeInstancesResponse, EbsInstanceBlockDevice,
    InstanceItem, InstanceNetworkInterface, InstanceStateChange, InstanceStateChangeResponse,
    NetworkInterfaceAttachment, Placement, PrivateIpAddressItem, Reservation,
    RunInstancesResponse, StateReason, Tag,
};

const INSTANCE_FILTERS: &[&str] = &[
    "instance-id",
    "instance-state-name",
    "instance-state-code",
    "instance-type",
    "image-id",
    "availability-zone",
    "reservation-id",
    "private-ip-address",
    "network-interface.mac-address",
];

const USER_SHUTDOWN: &str = "Client.UserInitiatedShutdown";
const DOMAIN_VANISHED: &str = "Server.InternalError";

/// Boot disk device; attached volumes may not claim it.
pub(super) const ROOT_DEVICE: &str = "vda";

#[derive(Debug, Clone)]
struct LaunchPlan {
    min: u32,
    max: u32,
    spec: ResourceSpec,
    zone: String,
    tags: Vec<(String, String)>,
    user_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateAction {
    Start,
    Stop { force: bool },
    Terminate,
}

impl StateAction {
    fn verb(&self) -> &'static str {
        match self {
            StateAction::Start => "start",
            StateAction::Stop { .. } => "stop",
            StateAction::Terminate => "terminate",
        }
    }

    fn check(&self, instance: &Instance) -> Result<()> {
        let allowed = match self {
            StateAction::Start => instance.state == InstanceState::Stopped,
            StateAction::Stop { .. } => instance.state == InstanceState::Running,
            StateAction::Terminate => !instance.is_terminated(),
        };
        if allowed {
            Ok(())
        } else {
            Err(busy(&instance.id, instance.state.name(), self.verb()))
        }
    }
}

fn instance_attribute(instance: &Instance, name: &str) -> Vec<String> {
    let value = match name {
        "instance-id" => instance.id.to_string(),
        "instance-state-name" => instance.state.name().to_string(),
        "instance-state-code" => instance.state.code().to_string(),
        "instance-type" => instance.spec.instance_type.clone(),
        "image-id" => instance.spec.image_id.clone(),
        "availability-zone" => instance.availability_zone.clone(),
        "reservation-id" => instance.reservation_id.clone(),
        "private-ip-address" => return instance.private_ip().map(str::to_string).into_iter().collect(),
        "network-interface.mac-address" => {
            return instance.interfaces.iter().map(|i| i.mac.clone()).collect()
        }
        _ => return Vec::new(),
    };
    vec![value]
}

/// `eni-` id for a guest NIC: instance hex plus the NIC-specific MAC tail.
fn interface_id(prefix: &str, instance: &Instance, iface: &NetworkInterface) -> String {
    let instance_hex: String = instance
        .id
        .as_str()
        .trim_start_matches("i-")
        .chars()
        .take(11)
        .collect();
    let mac_tail: String = iface
        .mac
        .split(':')
        .skip(3)
        .collect::<Vec<_>>()
        .concat();
    format!("{}-{}{}", prefix, instance_hex, mac_tail)
}

/// One-line summary used when a multi-instance call fails midway.
fn describe_change(change: &InstanceStateChange) -> String {
    format!(
        "{}: {} -> {}",
        change.instance_id, change.previous_state.name, change.current_state.name
    )
}

fn reservation_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("r-{}", &hex[..17])
}

impl Translator {
    pub async fn run_instances(&self, params: &Params) -> Result<RunInstancesResponse> {
        let plan = self.plan_launch(params)?;
        let reservation_id = reservation_id();

        let this = self.clone();
        let reservation = reservation_id.clone();
        let instances = detached(async move { this.launch(plan, reservation).await }).await?;

        let items = instances
            .iter()
            .map(|i| self.instance_item(i))
            .collect::<Result<Vec<_>>>()?;

        Ok(RunInstancesResponse {
            reservation_id,
            owner_id: OWNER_ID.to_string(),
            instances_set: items.into(),
        })
    }

    fn plan_launch(&self, params: &Params) -> Result<LaunchPlan> {
        let image_id = params.require("ImageId")?;
        if image_id.contains('/') {
            return Err(HypervisorError::invalid(
                "ImageId",
                format!("'{}' is not a valid image id", image_id),
            ));
        }

        let instance_type = params.get_or("InstanceType", DEFAULT_INSTANCE_TYPE);
        let shape = self.settings.instance_types.lookup(instance_type)?;

        let min = params.parse::<u32>("MinCount")?.unwrap_or(1);
        let max = params.parse::<u32>("MaxCount")?.unwrap_or(min);
        if min == 0 {
            return Err(HypervisorError::invalid("MinCount", "must be at least 1"));
        }
        if max < min {
            return Err(HypervisorError::invalid(
                "MaxCount",
                format!("{} is less than MinCount {}", max, min),
            ));
        }
        if max > self.settings.max_instances_per_request {
            return Err(HypervisorError::invalid(
                "MaxCount",
                format!(
                    "at most {} instances may be launched per request",
                    self.settings.max_instances_per_request
                ),
            ));
        }

        let vcpus = match params.parse::<u32>("CpuOptions.CoreCount")? {
            None => shape.vcpus,
            Some(0) => {
                return Err(HypervisorError::invalid("CpuOptions.CoreCount", "must be at least 1"))
            }
            Some(cores) => {
                let threads = params.parse::<u32>("CpuOptions.ThreadsPerCore")?.unwrap_or(1);
                if threads == 0 {
                    return Err(HypervisorError::invalid(
                        "CpuOptions.ThreadsPerCore",
                        "must be at least 1",
                    ));
                }
                cores.checked_mul(threads).ok_or_else(|| {
                    HypervisorError::invalid("CpuOptions.CoreCount", "too many vCPUs")
                })?
            }
        };

        let zone = match params.get("Placement.AvailabilityZone") {
            Some(zone) => {
                self.settings
                    .check_zone("Placement.AvailabilityZone", zone)?;
                zone.to_string()
            }
            None => self.settings.default_zone(),
        };

        let user_data = params
            .get("UserData")
            .map(cloudinit::decode_user_data)
            .transpose()?;

        let mut tags = Vec::new();
        for spec in params.tag_specifications()? {
            match spec.resource_type.as_str() {
                "instance" => tags.extend(spec.tags),
                // No EBS root volumes are created, so there is nothing to tag.
                "volume" => {}
                other => {
                    return Err(HypervisorError::invalid(
                        "TagSpecification.ResourceType",
                        format!("'{}' cannot be tagged by RunInstances", other),
                    ))
                }
            }
        }

        Ok(LaunchPlan {
            min,
            max,
            spec: ResourceSpec {
                instance_type: instance_type.to_string(),
                vcpus,
                memory_mib: shape.memory_mib,
                image_id: image_id.to_string(),
            },
            zone,
            tags,
            user_data,
        })
    }

    /// Launch up to `max` instances. Fewer than `min` is a failure and
    /// everything launched so far is torn down again.
    async fn launch(self, plan: LaunchPlan, reservation_id: String) -> Result<Vec<Instance>> {
        let mut launched: Vec<Instance> = Vec::new();

        for _ in 0..plan.max {
            match self.launch_one(&plan, &reservation_id).await {
                Ok(instance) => launched.push(instance),
                Err(e) if launched.len() as u32 >= plan.min => {
                    tracing::warn!(
                        "Launched {} of {} requested instances: {}",
                        launched.len(),
                        plan.max,
                        e
                    );
                    break;
                }
                Err(e) => {
                    self.roll_back(launched).await;
                    return Err(e);
                }
            }
        }

        Ok(launched)
    }

    async fn launch_one(&self, plan: &LaunchPlan, reservation_id: &str) -> Result<Instance> {
        let id = InstanceId::generate();

        let seed = match &plan.user_data {
            Some(user_data) => Some(self.import_seed(&id, user_data).await?),
            None => None,
        };

        let mut domain_spec = DomainSpec::new(id.as_str(), plan.spec.vcpus, plan.spec.memory_mib)
            .with_disk(DiskSpec::volume(&self.settings.pool, &plan.spec.image_id, ROOT_DEVICE).transient())
            .with_interface(InterfaceSpec::on_network(&self.settings.network));
        if let Some(seed) = &seed {
            domain_spec = domain_spec
                .with_disk(DiskSpec::cdrom(&seed.pool, &seed.name, SEED_DEVICE).with_serial("cloudinit"));
        }
        let requested_interfaces = domain_spec.interfaces.clone();

        let handle = match self
            .blocking(move |hv| hv.create_domain(&domain_spec))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_seed(seed).await;
                return Err(e);
            }
        };

        let mut instance = Instance::new(
            id.clone(),
            reservation_id.to_string(),
            handle.clone(),
            plan.spec.clone(),
            plan.zone.clone(),
        );
        instance.seed_volume = seed;

        // Report what libvirt actually defined, not what was asked for.
        let target = handle.clone();
        match self.blocking(move |hv| hv.domain_spec(&target)).await {
            Ok(defined) => {
                if defined.vcpus != plan.spec.vcpus || defined.memory_mib() != plan.spec.memory_mib {
                    tracing::warn!(
                        "Domain {} was defined with {} vCPU, {} MiB instead of {} vCPU, {} MiB",
                        handle.name,
                        defined.vcpus,
                        defined.memory_mib(),
                        plan.spec.vcpus,
                        plan.spec.memory_mib
                    );
                }
                instance.spec.vcpus = defined.vcpus;
                instance.spec.memory_mib = defined.memory_mib();
                instance.interfaces = defined.interfaces.iter().map(NetworkInterface::from).collect();
            }
            Err(e) => {
                tracing::warn!("Could not read back definition of {}: {}", handle.name, e);
                instance.interfaces = requested_interfaces.iter().map(NetworkInterface::from).collect();
            }
        }

        match self.observe(&handle).await {
            Ok(state) => instance.update_state(state),
            Err(e) => tracing::warn!("Could not read state of new domain {}: {}", handle.name, e),
        }

        if let Err(e) = self.store.instances.put(id.clone(), instance.clone()) {
            let _ = self.blocking(move |hv| hv.destroy_domain(&handle)).await;
            self.discard_seed(instance.seed_volume).await;
            return Err(e);
        }

        if !plan.tags.is_empty() {
            if let Err(e) = self.tags.set_tags(id.as_str(), "instance", &plan.tags) {
                tracing::warn!("Failed to tag {}: {}", id, e);
            }
        }

        tracing::info!(
            "Launched instance {} ({}: {} vCPU, {} MiB) from {}",
            id,
            plan.spec.instance_type,
            instance.spec.vcpus,
            instance.spec.memory_mib,
            plan.spec.image_id
        );

        Ok(instance)
    }

    /// Build the cloud-init seed for `id` and upload it into the pool.
    async fn import_seed(&self, id: &InstanceId, user_data: &[u8]) -> Result<VolumeHandle> {
        let hostname = format!("{}.internal", id);
        let image = cloudinit::seed_image(id.as_str(), &hostname, user_data, chrono::Utc::now())?;
        let spec = VolumeSpec::raw(
            &self.settings.pool,
            &cloudinit::seed_volume_name(id.as_str()),
            image.len() as u64,
        );
        let handle = self
            .blocking(move |hv| hv.import_volume(&spec, &image))
            .await?;
        tracing::debug!("Uploaded cloud-init seed {}", handle.key());
        Ok(handle)
    }

    async fn discard_seed(&self, seed: Option<VolumeHandle>) {
        let Some(seed) = seed else {
            return;
        };
        let key = seed.key();
        if let Err(e) = self.blocking(move |hv| hv.delete_volume(&seed)).await {
            tracing::warn!("Failed to delete cloud-init seed {}: {}", key, e);
        }
    }

    async fn roll_back(&self, launched: Vec<Instance>) {
        for instance in launched {
            let handle = instance.domain.clone();
            if let Err(e) = self.blocking(move |hv| hv.destroy_domain(&handle)).await {
                tracing::warn!("Rollback of {} failed: {}", instance.id, e);
            }
            self.discard_seed(instance.seed_volume.clone()).await;
            let _ = self.store.instances.remove(&instance.id).await;
            let _ = self.tags.delete_all(instance.id.as_str());
        }
    }

    async fn observe(&self, handle: &DomainHandle) -> Result<InstanceState> {
        let handle = handle.clone();
        let state = self
            .blocking(move |hv| hv.query_domain_state(&handle))
            .await?;
        Ok(InstanceState::from_domain(state))
    }

    /// State plus, for a running domain, its DHCP leases. Leases are
    /// best-effort: the guest may not have asked for one yet.
    async fn observe_with_addresses(
        &self,
        handle: &DomainHandle,
    ) -> Result<(InstanceState, Vec<InterfaceAddress>)> {
        let state = self.observe(handle).await?;
        if state != InstanceState::Running {
            return Ok((state, Vec::new()));
        }

        let target = handle.clone();
        match self.blocking(move |hv| hv.interface_addresses(&target)).await {
            Ok(addresses) => Ok((state, addresses)),
            Err(e) => {
                tracing::debug!("No leases for {}: {}", handle.name, e);
                Ok((state, Vec::new()))
            }
        }
    }

    pub async fn start_instances(&self, params: &Params) -> Result<InstanceStateChangeResponse> {
        self.change_states(params, StateAction::Start).await
    }

    pub async fn stop_instances(&self, params: &Params) -> Result<InstanceStateChangeResponse> {
        let force = params.bool("Force")?;
        self.change_states(params, StateAction::Stop { force }).await
    }

    pub async fn terminate_instances(
        &self,
        params: &Params,
    ) -> Result<InstanceStateChangeResponse> {
        self.change_states(params, StateAction::Terminate).await
    }

    fn requested_instances(&self, params: &Params, required: bool) -> Result<Vec<InstanceId>> {
        let raw = params.list("InstanceId")?;
        if required && raw.is_empty() {
            return Err(HypervisorError::MissingParameter("InstanceId".to_string()));
        }

        let mut ids: Vec<InstanceId> = Vec::with_capacity(raw.len());
        for (n, value) in raw.iter().enumerate() {
            let id = InstanceId::parse_field(value, &format!("InstanceId.{}", n + 1))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Lock every requested record before touching any of them, so a bad id
    /// or a busy record fails the call with the store unchanged.
    ///
    /// Records are then changed in request order. When one fails, the ones
    /// before it stay changed and the error lists them.
    async fn change_states(
        &self,
        params: &Params,
        action: StateAction,
    ) -> Result<InstanceStateChangeResponse> {
        let ids = self.requested_instances(params, true)?;

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.store.instances.try_lock(id)? {
                TryLock::Acquired(guard) => guards.push(guard),
                TryLock::Busy(published) => {
                    return Err(busy(id, published.state.name(), action.verb()))
                }
            }
        }
        for guard in &guards {
            action.check(guard.current())?;
        }

        let this = self.clone();
        let changes = detached(async move {
            let mut changes = Vec::with_capacity(guards.len());
            for guard in guards {
                match this.apply_state_action(guard, action).await {
                    Ok(change) => changes.push(change),
                    Err(e) => {
                        let completed: Vec<String> = changes.iter().map(describe_change).collect();
                        if !completed.is_empty() {
                            tracing::warn!(
                                "{} failed after {} of the requested instances changed",
                                action.verb(),
                                completed.len()
                            );
                        }
                        return Err(e.after(completed));
                    }
                }
            }
            Ok(changes)
        })
        .await?;

        Ok(InstanceStateChangeResponse {
            instances_set: changes.into(),
        })
    }

    async fn apply_state_action(
        &self,
        mut guard: RecordGuard<InstanceId, Instance>,
        action: StateAction,
    ) -> Result<InstanceStateChange> {
        let instance_id = guard.id().to_string();
        let previous = guard.current().state;
        let handle = guard.current().domain.clone();

        let current = match action {
            StateAction::Start => {
                guard.apply(|i| i.update_state(InstanceState::Pending));
                let target = handle.clone();
                match self
                    .blocking(move |hv| hv.set_domain_state(&target, DesiredState::Running))
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        self.mark_vanished(&mut guard).await;
                        return Err(busy(guard.id(), InstanceState::Terminated.name(), action.verb()));
                    }
                    Err(e) => {
                        guard.apply(|i| i.update_state(previous));
                        return Err(e);
                    }
                }
                let observed = self.observe(&handle).await.unwrap_or(InstanceState::Running);
                guard.apply(|i| {
                    i.state_reason = None;
                    i.update_state(observed);
                });
                tracing::info!("Started instance {}", guard.id());
                observed
            }
            StateAction::Stop { force } => {
                guard.apply(|i| i.update_state(InstanceState::Stopping));
                let target = handle.clone();
                match self
                    .blocking(move |hv| hv.set_domain_state(&target, DesiredState::Shutoff { force }))
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        self.mark_vanished(&mut guard).await;
                        return Err(busy(guard.id(), InstanceState::Terminated.name(), action.verb()));
                    }
                    Err(e) => {
                        guard.apply(|i| i.update_state(previous));
                        return Err(e);
                    }
                }
                let observed = self.observe(&handle).await.unwrap_or(InstanceState::Stopped);
                guard.apply(|i| i.update_state_with_reason(observed, USER_SHUTDOWN));
                tracing::info!("Stopped instance {}", guard.id());
                observed
            }
            StateAction::Terminate => self.terminate_locked(guard, previous).await?,
        };

        Ok(InstanceStateChange {
            instance_id,
            current_state: current.info(),
            previous_state: previous.info(),
        })
    }

    async fn terminate_locked(
        &self,
        mut guard: RecordGuard<InstanceId, Instance>,
        previous: InstanceState,
    ) -> Result<InstanceState> {
        guard.apply(|i| i.update_state(InstanceState::Stopping));

        let handle = guard.current().domain.clone();
        match self.blocking(move |hv| hv.destroy_domain(&handle)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!("Domain of {} was already gone", guard.id());
            }
            Err(e) => {
                guard.apply(|i| i.update_state(previous));
                return Err(e);
            }
        }

        let id = guard.id().clone();
        self.store.clear_attachments_to(&id).await;
        let seed = guard.current().seed_volume.clone();
        self.discard_seed(seed).await;
        guard.apply(|i| i.seed_volume = None);

        match self.settings.retention {
            RetentionPolicy::Retain => {
                guard.apply(|i| i.update_state_with_reason(InstanceState::Terminated, USER_SHUTDOWN));
            }
            RetentionPolicy::Remove => {
                self.store.instances.remove_locked(guard);
                if let Err(e) = self.tags.delete_all(id.as_str()) {
                    tracing::warn!("Failed to drop tags of {}: {}", id, e);
                }
            }
        }

        tracing::info!("Terminated instance {}", id);
        Ok(InstanceState::Terminated)
    }

    pub async fn describe_instances(&self, params: &Params) -> Result<DescribeInstancesResponse> {
        let ids = self.requested_instances(params, false)?;
        let filters = FilterSet::new(params.filters()?, INSTANCE_FILTERS)?;

        let listing = if ids.is_empty() {
            self.store.instances.list(everything)
        } else {
            self.store.instances.list_ids(&ids, everything)
        };

        let targets: Vec<InstanceId> = listing.ids().cloned().collect();
        let this = self.clone();
        detached(async move {
            this.refresh_instances(&targets).await;
            Ok(())
        })
        .await?;

        let mut reservations: Vec<Reservation> = Vec::new();
        for instance in listing.iter() {
            let tags = self.tags.tags_for(instance.id.as_str())?;
            if !filters.matches(|name| instance_attribute(&instance, name), &tags) {
                continue;
            }

            let item = self.instance_item_with_tags(&instance, tags);
            match reservations
                .iter_mut()
                .find(|r| r.reservation_id == instance.reservation_id)
            {
                Some(reservation) => reservation.instances_set.items.push(item),
                None => reservations.push(Reservation {
                    reservation_id: instance.reservation_id.clone(),
                    owner_id: OWNER_ID.to_string(),
                    instances_set: vec![item].into(),
                }),
            }
        }

        Ok(DescribeInstancesResponse {
            reservation_set: reservations.into(),
        })
    }

    /// The domain is gone from libvirt: terminate the record and release
    /// what pointed at it.
    async fn mark_vanished(&self, guard: &mut RecordGuard<InstanceId, Instance>) {
        let id = guard.id().clone();
        tracing::warn!("Domain of {} disappeared, marking it terminated", id);
        guard.apply(|i| i.update_state_with_reason(InstanceState::Terminated, DOMAIN_VANISHED));
        self.store.clear_attachments_to(&id).await;
        let seed = guard.current().seed_volume.clone();
        self.discard_seed(seed).await;
        guard.apply(|i| i.seed_volume = None);
    }

    /// Best-effort. libvirt is queried without holding any record, so a
    /// slow query never blocks StopInstances and friends. An observation is
    /// dropped when the record is busy, or changed while it was taken.
    async fn refresh_instances(&self, ids: &[InstanceId]) {
        for id in ids {
            let Ok(seen) = self.store.instances.get(id) else {
                continue;
            };
            if seen.is_terminated() {
                continue;
            }

            let observed = self.observe_with_addresses(&seen.domain).await;

            let mut guard = match self.store.instances.try_lock(id) {
                Ok(TryLock::Acquired(guard)) => guard,
                Ok(TryLock::Busy(_)) | Err(_) => continue,
            };
            if guard.current().updated_at != seen.updated_at || guard.current().is_terminated() {
                continue;
            }

            match observed {
                Ok((state, addresses)) => {
                    let state_changed = state != guard.current().state;
                    if state_changed {
                        tracing::info!(
                            "Instance {} changed from {} to {} outside the API",
                            id,
                            guard.current().state,
                            state
                        );
                        guard.current_mut().update_state(state);
                    }
                    let leases_changed = guard.current_mut().record_addresses(&addresses);
                    if state_changed || leases_changed {
                        guard.publish();
                    }
                }
                Err(e) if e.is_not_found() => self.mark_vanished(&mut guard).await,
                Err(e) => tracing::warn!("Could not refresh {}: {}", id, e),
            }
        }
    }

    fn instance_item(&self, instance: &Instance) -> Result<InstanceItem> {
        let tags = self.tags.tags_for(instance.id.as_str())?;
        Ok(self.instance_item_with_tags(instance, tags))
    }

    fn instance_item_with_tags(&self, instance: &Instance, tags: Vec<(String, String)>) -> InstanceItem {
        let block_devices: Vec<BlockDeviceMapping> = self
            .store
            .volumes
            .list(|v| v.is_attached_to(&instance.id))
            .iter()
            .filter_map(|v| {
                let attachment = v.attachment.as_ref()?;
                Some(BlockDeviceMapping {
                    device_name: attachment.device_path(),
                    ebs: EbsInstanceBlockDevice {
                        volume_id: v.id.to_string(),
                        status: "attached".to_string(),
                        attach_time: timestamp(&attachment.attached_at),
                        delete_on_termination: false,
                    },
                })
            })
            .collect();

        let interfaces: Vec<InstanceNetworkInterface> = instance
            .interfaces
            .iter()
            .enumerate()
            .map(|(index, iface)| InstanceNetworkInterface {
                network_interface_id: interface_id("eni", instance, iface),
                owner_id: OWNER_ID.to_string(),
                status: "in-use".to_string(),
                mac_address: iface.mac.clone(),
                private_ip_address: iface.private_ip.clone(),
                private_dns_name: instance.private_dns_name.clone(),
                attachment: NetworkInterfaceAttachment {
                    attachment_id: interface_id("eni-attach", instance, iface),
                    device_index: index as u32,
                    status: "attached".to_string(),
                    attach_time: timestamp(&instance.created_at),
                    delete_on_termination: true,
                },
                private_ip_addresses_set: iface
                    .private_ip
                    .iter()
                    .map(|ip| PrivateIpAddressItem {
                        private_ip_address: ip.clone(),
                        private_dns_name: instance.private_dns_name.clone(),
                        primary: true,
                    })
                    .collect::<Vec<_>>()
                    .into(),
            })
            .collect();

        InstanceItem {
            instance_id: instance.id.to_string(),
            image_id: instance.spec.image_id.clone(),
            instance_state: instance.state.info(),
            private_dns_name: instance.private_dns_name.clone(),
            private_ip_address: instance.private_ip().map(str::to_string),
            instance_type: instance.spec.instance_type.clone(),
            launch_time: timestamp(&instance.created_at),
            placement: Placement {
                availability_zone: instance.availability_zone.clone(),
            },
            cpu_options: CpuOptions {
                core_count: instance.spec.vcpus,
                threads_per_core: 1,
            },
            memory_mib: instance.spec.memory_mib,
            state_reason: instance.state_reason.as_ref().map(|code| StateReason {
                code: code.clone(),
                message: format!("{}: state changed to {}", code, instance.state),
            }),
            block_device_mapping: block_devices.into(),
            network_interface_set: interfaces.into(),
            tag_set: tags
                .into_iter()
                .map(|(key, value)| Tag { key, value })
                .collect::<Vec<_>>()
                .into(),
        }
    }
}
