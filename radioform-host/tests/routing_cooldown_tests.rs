//! Crate-level scenario test: a physical device disappears and reappears
//! inside the registry's cooldown window, confirming the routing brain
//! doesn't flap the virtual endpoint back into existence early (S6/S7 of
//! the ring transport's scenario list, exercised here through the host's
//! own `RoutingBrain` rather than the registry directly).

use radioform_core::registry::{PhysicalEntry, ReconcileAction};
use radioform_core::ring::{uid_to_filename, Ring, SampleFormat};
use radioform_host::routing::{OsAudioObserver, RoutingBrain};
use serial_test::serial;
use std::sync::{Arc, Mutex};

struct StaticObserver {
    physicals: Arc<Mutex<Vec<PhysicalEntry>>>,
}

impl OsAudioObserver for StaticObserver {
    fn list_physical_outputs(&self) -> Vec<PhysicalEntry> {
        self.physicals.lock().unwrap().clone()
    }

    fn default_output_name(&self) -> Option<String> {
        None
    }

    fn virtual_endpoint_volume(&self, _virtual_uid: &str) -> Option<f32> {
        None
    }

    fn set_master_volume(&self, _device_name: &str, _volume: f32) {}

    fn set_default_output(&self, _device_name: &str) -> bool {
        false
    }
}

#[test]
#[serial]
fn device_removed_then_readded_stays_in_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let uid = "phys-1-eq";
    let ring_path = dir.path().join(uid_to_filename(uid));
    let ring = Ring::create_or_open(&ring_path, 48000, 2, SampleFormat::F32, 40).unwrap();
    ring.update_heartbeat_consumer();

    let physicals = Arc::new(Mutex::new(vec![PhysicalEntry { name: "Speakers".into(), uid: "phys-1".into() }]));
    let observer = StaticObserver { physicals: Arc::clone(&physicals) };
    let mut brain = RoutingBrain::new(observer, dir.path(), false, false);

    let actions = brain.tick();
    assert_eq!(actions, vec![ReconcileAction::Create(uid.into())]);

    physicals.lock().unwrap().clear();
    let actions = brain.tick();
    assert_eq!(actions, vec![ReconcileAction::Destroy(uid.into())]);

    physicals.lock().unwrap().push(PhysicalEntry { name: "Speakers".into(), uid: "phys-1".into() });
    let actions = brain.tick();
    assert!(actions.is_empty(), "re-adding during cooldown should not recreate the endpoint");
}
