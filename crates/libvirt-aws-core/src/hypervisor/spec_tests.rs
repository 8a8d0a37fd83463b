use super::*;

fn sample_domain() -> DomainSpec {
    DomainSpec::new("i-0123456789abcdef0", 2, 4096)
        .with_disk(DiskSpec::volume("default", "ami-ubuntu.qcow2", "vda").transient())
        .with_disk(
            DiskSpec::volume("default", "vol-0aa11bb22cc33dd44.qcow2", "vdb").with_serial("vol0aa11"),
        )
        .with_interface(InterfaceSpec {
            network: "default".to_string(),
            mac: "52:54:00:12:34:56".to_string(),
            model: "virtio".to_string(),
        })
}

#[test]
fn test_domain_round_trip() {
    let spec = sample_domain();
    let xml = spec.to_xml().unwrap();
    let parsed = DomainSpec::from_xml(&xml).unwrap();
    assert_eq!(parsed, spec);
}

#[test]
fn test_domain_round_trip_extremes() {
    for (vcpus, memory_mib) in [(1, 1), (255, 4 * 1024 * 1024), (u32::MAX, 1 << 40)] {
        let spec = DomainSpec::new("i-edge", vcpus, memory_mib);
        let parsed = DomainSpec::from_xml(&spec.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.vcpus, vcpus);
        assert_eq!(parsed.memory_mib(), memory_mib);
        assert_eq!(parsed, spec);
    }
}

#[test]
fn test_domain_xml_shape() {
    let xml = sample_domain().to_xml().unwrap();
    assert!(xml.starts_with("<domain type=\"kvm\">"));
    assert!(xml.contains("<name>i-0123456789abcdef0</name>"));
    assert!(xml.contains("<memory unit=\"KiB\">4194304</memory>"));
    assert!(xml.contains("<vcpu placement=\"static\">2</vcpu>"));
    assert!(xml.contains("<source pool=\"default\" volume=\"ami-ubuntu.qcow2\"/>"));
    assert!(xml.contains("<transient shareBacking=\"yes\"/>"));
    assert!(xml.contains("<mac address=\"52:54:00:12:34:56\"/>"));
}

#[test]
fn test_parse_libvirt_dump() {
    // Trimmed `virsh dumpxml` output with elements the emulator ignores.
    let dump = r#"
<domain type='kvm' id='3'>
  <name>i-0abc</name>
  <uuid>6f1c1e36-2b58-4f0e-9c1a-0b8e1e2f3a4b</uuid>
  <memory unit='GiB'>2</memory>
  <currentMemory unit='KiB'>2097152</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64' machine='pc-q35-6.2'>hvm</type>
    <boot dev='hd'/>
  </os>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='volume' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source pool='images' volume='base.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='/var/lib/libvirt/images/seed.iso'/>
      <target dev='hdd' bus='ide'/>
    </disk>
    <controller type='usb' index='0'/>
    <interface type='network'>
      <mac address='52:54:00:aa:bb:cc'/>
      <source network='default'/>
      <model type='virtio'/>
    </interface>
    <console type='pty'>
      <target type='serial' port='0'/>
    </console>
  </devices>
</domain>"#;

    let spec = DomainSpec::from_xml(dump).unwrap();
    assert_eq!(spec.name, "i-0abc");
    assert_eq!(spec.vcpus, 2);
    assert_eq!(spec.memory_mib(), 2048);
    assert_eq!(spec.disks.len(), 1);
    assert_eq!(spec.disks[0].pool, "images");
    assert_eq!(spec.disks[0].volume, "base.qcow2");
    assert!(!spec.disks[0].transient);
    assert_eq!(spec.interfaces.len(), 1);
    assert_eq!(spec.interfaces[0].mac, "52:54:00:aa:bb:cc");
}

#[test]
fn test_parse_rejects_bad_uuid() {
    let xml = sample_domain().to_xml().unwrap();
    let broken = xml.replacen("<uuid>", "<uuid>zz", 1);
    assert!(DomainSpec::from_xml(&broken).is_err());
}

#[test]
fn test_disk_device_round_trip() {
    let disk = DiskSpec::volume("default", "vol-1.qcow2", "vdc").with_serial("vol1");
    let xml = disk.to_xml().unwrap();
    assert!(xml.starts_with("<disk type=\"volume\" device=\"disk\">"));
    assert_eq!(DiskSpec::from_xml(&xml).unwrap(), disk);
}

#[test]
fn test_cdrom_round_trip() {
    let seed = DiskSpec::cdrom("default", "i-0abc-cidata.iso", "hdd");
    let xml = seed.to_xml().unwrap();
    assert!(xml.starts_with("<disk type=\"volume\" device=\"cdrom\">"));
    assert!(xml.contains("<driver name=\"qemu\" type=\"raw\"/>"));
    assert!(xml.contains("<target dev=\"hdd\" bus=\"ide\"/>"));
    assert!(xml.contains("<readonly/>"));
    assert_eq!(DiskSpec::from_xml(&xml).unwrap(), seed);

    let domain = sample_domain().with_disk(seed.clone());
    let parsed = DomainSpec::from_xml(&domain.to_xml().unwrap()).unwrap();
    assert_eq!(parsed.disks.last(), Some(&seed));
}

#[test]
fn test_raw_volume_keeps_exact_size() {
    let spec = VolumeSpec::raw("default", "seed.iso", 374_784);
    let xml = spec.to_xml().unwrap();
    assert!(xml.contains("<capacity unit=\"bytes\">374784</capacity>"));
    assert!(xml.contains("<format type=\"raw\"/>"));
    let parsed = VolumeSpec::from_xml("default", &xml).unwrap();
    assert_eq!(parsed, spec);
    assert_eq!(parsed.capacity_gib(), 1);
}

#[test]
fn test_interface_mac_is_qemu_range() {
    let iface = InterfaceSpec::on_network("default");
    assert!(iface.mac.starts_with("52:54:00:"));
    assert_eq!(iface.mac.len(), 17);
}

#[test]
fn test_volume_round_trip() {
    let spec = VolumeSpec::qcow2("default", "vol-0aa11bb22cc33dd44.qcow2", 10);
    let xml = spec.to_xml().unwrap();
    assert!(xml.contains("<capacity unit=\"bytes\">10737418240</capacity>"));
    assert_eq!(VolumeSpec::from_xml("default", &xml).unwrap(), spec);
}

#[test]
fn test_volume_parse_libvirt_units() {
    let doc = r#"<volume type='file'>
  <name>data.qcow2</name>
  <key>/var/lib/libvirt/images/data.qcow2</key>
  <capacity unit='G'>5</capacity>
  <allocation unit='bytes'>196624</allocation>
  <target>
    <path>/var/lib/libvirt/images/data.qcow2</path>
    <format type='qcow2'/>
  </target>
</volume>"#;
    let spec = VolumeSpec::from_xml("default", doc).unwrap();
    assert_eq!(spec.capacity_gib(), 5);
    assert_eq!(spec.capacity_bytes, 5 << 30);
    assert_eq!(spec.format, "qcow2");
}
