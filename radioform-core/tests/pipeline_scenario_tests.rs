//! Crate-level scenario test: a virtual endpoint producing audio, the ring
//! carrying it, and the registry observing liveness and removal, wired
//! together the way the host process actually uses them (unlike the
//! per-module unit tests, which exercise each piece in isolation).

use radioform_core::endpoint::VirtualEndpoint;
use radioform_core::registry::{EndpointRegistry, PhysicalEntry, ReconcileAction};
use radioform_core::ring::{uid_to_filename, Ring, SampleFormat};
use radioform_core::sample_format::SourceFormat;
use serial_test::serial;

#[test]
#[serial]
fn endpoint_output_is_readable_through_the_registry_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let uid = "physical-1-eq";

    let mut endpoint = VirtualEndpoint::new(uid, dir.path(), 48000, 2);
    let host = radioform_core::endpoint::SimulatedPluginHost { clients: 1 };
    endpoint.start_io(&host).unwrap();

    let samples: Vec<f32> = (0..960).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
    endpoint.write_mixed_output(SourceFormat::F32Interleaved, 48000, &bytes, 480);

    let ring_path = dir.path().join(uid_to_filename(uid));
    let mut consumer = Ring::create_or_open(&ring_path, 48000, 2, SampleFormat::F32, 40).unwrap();
    consumer.update_heartbeat_consumer();
    let mut out = vec![0.0_f32; samples.len()];
    let read = consumer.read(&mut out, 480);
    assert_eq!(read, 480);
    assert_eq!(out, samples);

    let mut registry = EndpointRegistry::new(dir.path());
    let entries = vec![PhysicalEntry { name: "Speakers".into(), uid: uid.into() }];
    let actions = registry.reconcile(&entries);
    assert_eq!(actions, vec![ReconcileAction::Create(uid.into())]);
    assert!(registry.is_live(uid));

    endpoint.stop_io();
    let actions = registry.reconcile(&[]);
    assert_eq!(actions, vec![ReconcileAction::Destroy(uid.into())]);
    assert!(!registry.is_live(uid));
}
