//! Routing brain (C9): watches the OS device list and default output, keeps
//! the control file and registry in sync, and mirrors virtual-endpoint
//! volume onto the physical device.
//!
//! The real platform notification APIs (CoreAudio property listeners,
//! WASAPI `IMMNotificationClient`, PipeWire registry events) are out of
//! scope; [`OsAudioObserver`] is the trait boundary a real binding would
//! implement, with [`CpalAudioObserver`] standing in as a polling
//! implementation over `cpal`'s device enumeration.

use radioform_core::registry::{write_control_file, EndpointRegistry, PhysicalEntry, ReconcileAction};
use radioform_core::time::now_ms;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const VOLUME_CHANGE_THRESHOLD: f32 = 0.001;
const VOLUME_COOLDOWN_MS: u64 = 500;
const VIRTUAL_UID_SUFFIX: &str = "-eq";

/// Observes OS-level audio device state. A real implementation binds to the
/// platform's device/volume notification APIs; [`CpalAudioObserver`] polls
/// `cpal` instead.
pub trait OsAudioObserver {
    /// Every currently enumerable physical output device.
    fn list_physical_outputs(&self) -> Vec<PhysicalEntry>;

    /// The name of the OS's current default output device, if any.
    fn default_output_name(&self) -> Option<String>;

    /// Current master-channel volume (0.0-1.0) of the **virtual** endpoint
    /// identified by `virtual_uid`, if readable. This is the volume the user
    /// actually touches, since the virtual endpoint is the OS's visible
    /// output; the physical device just follows it.
    fn virtual_endpoint_volume(&self, virtual_uid: &str) -> Option<f32>;

    /// Best-effort: set `device_name`'s master-channel volume (the physical
    /// device, mirroring what was read from its virtual endpoint).
    fn set_master_volume(&self, device_name: &str, volume: f32);

    /// Best-effort: make `device_name` the OS default output. Returns
    /// whether the request is even supported on this backend.
    fn set_default_output(&self, device_name: &str) -> bool;
}

/// Polls `cpal`'s device list once per tick in place of real OS
/// notifications. `cpal` exposes no volume or default-device-selection API,
/// so those two methods are no-ops that log and return unsupported — a
/// gap a real platform binding would fill, not something this crate can
/// emulate honestly.
pub struct CpalAudioObserver;

impl OsAudioObserver for CpalAudioObserver {
    fn list_physical_outputs(&self) -> Vec<PhysicalEntry> {
        use cpal::traits::{DeviceTrait, HostTrait};
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => devices
                .filter_map(|d| d.name().ok())
                .map(|name| PhysicalEntry { uid: name.clone(), name })
                .collect(),
            Err(err) => {
                warn!(%err, "failed to enumerate output devices");
                Vec::new()
            }
        }
    }

    fn default_output_name(&self) -> Option<String> {
        use cpal::traits::{DeviceTrait, HostTrait};
        cpal::default_host().default_output_device().and_then(|d| d.name().ok())
    }

    fn virtual_endpoint_volume(&self, _virtual_uid: &str) -> Option<f32> {
        None
    }

    fn set_master_volume(&self, device_name: &str, volume: f32) {
        debug!(device = %device_name, volume, "volume forwarding unsupported on this backend");
    }

    fn set_default_output(&self, device_name: &str) -> bool {
        debug!(device = %device_name, "default-output switching unsupported on this backend");
        false
    }
}

/// The control-file uid a physical device's virtual proxy is registered
/// under. Exposed so the host's main loop can work out which uid its own
/// render device corresponds to.
pub fn virtual_uid(physical_uid: &str) -> String {
    format!("{physical_uid}{VIRTUAL_UID_SUFFIX}")
}

struct VolumeTracker {
    last_value: f32,
    last_change_ms: u64,
}

/// Owns the control file, the registry, and per-uid volume-forwarding state.
/// `tick` is meant to run on a fixed interval from the host's main loop.
pub struct RoutingBrain<O: OsAudioObserver> {
    observer: O,
    registry: EndpointRegistry,
    control_file_path: PathBuf,
    known_physicals: Vec<PhysicalEntry>,
    auto_switch: bool,
    forward_volume: bool,
    volumes: HashMap<String, VolumeTracker>,
}

impl<O: OsAudioObserver> RoutingBrain<O> {
    pub fn new(observer: O, ring_dir: impl Into<PathBuf>, auto_switch: bool, forward_volume: bool) -> Self {
        let ring_dir = ring_dir.into();
        Self {
            observer,
            control_file_path: ring_dir.join("control.txt"),
            registry: EndpointRegistry::new(ring_dir),
            known_physicals: Vec::new(),
            auto_switch,
            forward_volume,
            volumes: HashMap::new(),
        }
    }

    /// One polling pass: device-list sync, default-output auto-switch, and
    /// volume forwarding. Returns the reconcile actions the registry took,
    /// for the caller to apply against live `VirtualEndpoint`s.
    pub fn tick(&mut self) -> Vec<ReconcileAction> {
        let physicals = self.observer.list_physical_outputs();
        let virtualized: Vec<PhysicalEntry> =
            physicals.iter().map(|p| PhysicalEntry { name: p.name.clone(), uid: virtual_uid(&p.uid) }).collect();

        if physicals != self.known_physicals {
            self.on_device_list_changed(&virtualized);
            self.known_physicals = physicals.clone();
        }

        if self.auto_switch {
            self.check_default_output(&physicals);
        }

        if self.forward_volume {
            self.forward_volumes(&physicals);
        }

        self.registry.reconcile(&virtualized)
    }

    fn on_device_list_changed(&mut self, virtualized: &[PhysicalEntry]) {
        info!(count = virtualized.len(), "device list changed, rewriting control file");
        if let Err(err) = write_control_file(&self.control_file_path, virtualized) {
            warn!(%err, "failed to rewrite control file");
        }
    }

    /// If the OS default output became one of our tracked physicals (not
    /// its virtual proxy) and that physical has a live virtual endpoint,
    /// switch the default back to the virtual so the user's volume control
    /// always lands on the EQ'd path.
    fn check_default_output(&mut self, physicals: &[PhysicalEntry]) {
        let Some(default_name) = self.observer.default_output_name() else { return };
        let Some(physical) = physicals.iter().find(|p| p.name == default_name) else { return };
        let uid = virtual_uid(&physical.uid);
        if !self.registry.is_live(&uid) {
            return;
        }
        info!(device = %physical.name, "default output reverted to physical, switching back to virtual");
        self.observer.set_default_output(&physical.name);
    }

    fn forward_volumes(&mut self, physicals: &[PhysicalEntry]) {
        let now = now_ms();
        for physical in physicals {
            let uid = virtual_uid(&physical.uid);
            if !self.registry.is_live(&uid) {
                continue;
            }
            let Some(volume) = self.observer.virtual_endpoint_volume(&uid) else { continue };
            let tracker = self.volumes.entry(uid.clone()).or_insert(VolumeTracker { last_value: volume, last_change_ms: 0 });

            let delta = (volume - tracker.last_value).abs();
            if delta < VOLUME_CHANGE_THRESHOLD {
                continue;
            }
            if now.saturating_sub(tracker.last_change_ms) < VOLUME_COOLDOWN_MS {
                continue;
            }

            self.observer.set_master_volume(&physical.name, volume);
            tracker.last_value = volume;
            tracker.last_change_ms = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Mutex;

    struct FakeObserver {
        physicals: Mutex<Vec<PhysicalEntry>>,
        default_name: Mutex<Option<String>>,
        volumes: Mutex<HashMap<String, f32>>,
        forwarded: RefCell<Vec<(String, f32)>>,
        switch_calls: RefCell<Vec<String>>,
    }

    impl OsAudioObserver for FakeObserver {
        fn list_physical_outputs(&self) -> Vec<PhysicalEntry> {
            self.physicals.lock().unwrap().clone()
        }

        fn default_output_name(&self) -> Option<String> {
            self.default_name.lock().unwrap().clone()
        }

        fn virtual_endpoint_volume(&self, virtual_uid: &str) -> Option<f32> {
            self.volumes.lock().unwrap().get(virtual_uid).copied()
        }

        fn set_master_volume(&self, device_name: &str, volume: f32) {
            self.forwarded.borrow_mut().push((device_name.to_string(), volume));
        }

        fn set_default_output(&self, device_name: &str) -> bool {
            self.switch_calls.borrow_mut().push(device_name.to_string());
            true
        }
    }

    fn live_uid(dir: &std::path::Path, uid: &str) -> radioform_core::ring::Ring {
        let path = dir.join(radioform_core::ring::uid_to_filename(uid));
        radioform_core::ring::Ring::create_or_open(&path, 48000, 2, radioform_core::ring::SampleFormat::F32, 40).unwrap()
    }

    #[test]
    fn device_list_change_rewrites_control_file() {
        let dir = tempfile::tempdir().unwrap();
        let observer = FakeObserver {
            physicals: Mutex::new(vec![PhysicalEntry { name: "Speakers".into(), uid: "phys-1".into() }]),
            default_name: Mutex::new(None),
            volumes: Mutex::new(HashMap::new()),
            forwarded: RefCell::new(Vec::new()),
            switch_calls: RefCell::new(Vec::new()),
        };
        let _ring = live_uid(dir.path(), "phys-1-eq");
        let _ring_producer = {
            let r = radioform_core::ring::Ring::create_or_open(
                &dir.path().join(radioform_core::ring::uid_to_filename("phys-1-eq")),
                48000,
                2,
                radioform_core::ring::SampleFormat::F32,
                40,
            )
            .unwrap();
            r.update_heartbeat_consumer();
            r
        };

        let mut brain = RoutingBrain::new(observer, dir.path(), true, true);
        let actions = brain.tick();
        assert_eq!(actions, vec![ReconcileAction::Create("phys-1-eq".into())]);

        let contents = std::fs::read_to_string(dir.path().join("control.txt")).unwrap();
        assert!(contents.contains("Speakers|phys-1-eq"));
    }

    #[test]
    fn volume_forwarding_is_debounced_by_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = Mutex::new(HashMap::from([("phys-1-eq".to_string(), 0.5)]));
        let observer = FakeObserver {
            physicals: Mutex::new(vec![PhysicalEntry { name: "Speakers".into(), uid: "phys-1".into() }]),
            default_name: Mutex::new(None),
            volumes,
            forwarded: RefCell::new(Vec::new()),
            switch_calls: RefCell::new(Vec::new()),
        };
        let ring = live_uid(dir.path(), "phys-1-eq");
        ring.update_heartbeat_consumer();

        let mut brain = RoutingBrain::new(observer, dir.path(), true, true);
        brain.tick(); // creates the endpoint
        brain.tick(); // establishes the volume baseline, no change yet
        assert!(brain.observer.forwarded.borrow().is_empty());

        *brain.observer.volumes.lock().unwrap().get_mut("phys-1-eq").unwrap() = 0.5001;
        brain.tick();
        assert!(brain.observer.forwarded.borrow().is_empty(), "delta below threshold should not forward");

        *brain.observer.volumes.lock().unwrap().get_mut("phys-1-eq").unwrap() = 0.75;
        brain.tick();
        let forwarded = brain.observer.forwarded.borrow();
        assert_eq!(forwarded.len(), 1);
        // Read from the virtual endpoint's volume (keyed by uid above), but
        // written onto the physical device's own volume control.
        assert_eq!(forwarded[0], ("Speakers".to_string(), 0.75));
    }
}
