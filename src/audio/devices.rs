use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CaptureSession, SpectrumFrame};

/// Cadence of the hot-plug scan.
const POLL_INTERVAL: Duration = Duration::from_millis(128);

/// Frame fan-out shared with every capture callback.
///
/// Subscribers are plain unbounded channel receivers; a dropped receiver is
/// pruned on the next publish, so unsubscribing is just dropping the handle.
#[derive(Clone, Default)]
pub struct Subscribers {
    senders: Arc<Mutex<Vec<Sender<SpectrumFrame>>>>,
}

impl Subscribers {
    pub fn add(&self) -> Receiver<SpectrumFrame> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Delivers `frame` to every live subscriber. Runs on capture callback
    /// threads, so it must not block: unbounded sends never do, and the lock
    /// is only ever held for these short push/retain operations.
    pub fn publish(&self, frame: SpectrumFrame) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        senders.retain(|tx| tx.send(frame.clone()).is_ok());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Read-only view of one tracked endpoint.
///
/// `cpal` exposes no stable device id, so the device name doubles as the id.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Registry configuration, typically sourced from the settings store.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    /// Display-name fragment of the endpoint to force as the default output.
    /// When set and nothing matches, no session carries the default tag.
    pub default_output_override: Option<String>,
}

/// Tracks live render endpoints, one capture session each, and owns the
/// single default-output designation.
///
/// All sessions live on a dedicated watcher thread (`cpal` streams cannot
/// move between threads); the rest of the process sees them through the
/// endpoint snapshot and the frame subscription.
pub struct DeviceRegistry {
    subscribers: Subscribers,
    endpoints: Arc<Mutex<Vec<EndpointInfo>>>,
    stop_flag: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl DeviceRegistry {
    /// Starts the registry. The watcher thread performs the initial endpoint
    /// build, then reconciles hot-plug changes every [`POLL_INTERVAL`] until
    /// [`DeviceRegistry::stop`].
    pub fn start(settings: RegistrySettings) -> Result<Self> {
        let subscribers = Subscribers::default();
        let endpoints = Arc::new(Mutex::new(Vec::new()));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let watcher = thread::Builder::new().name("device-watcher".into()).spawn({
            let subscribers = subscribers.clone();
            let endpoints = Arc::clone(&endpoints);
            let stop_flag = Arc::clone(&stop_flag);
            move || run_watcher(settings, subscribers, endpoints, stop_flag)
        })?;

        Ok(Self {
            subscribers,
            endpoints,
            stop_flag,
            watcher: Some(watcher),
        })
    }

    /// Subscribes to the frame broadcast. Every frame from every session is
    /// delivered, default tag passed through unchanged; consumers filter.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<SpectrumFrame> {
        self.subscribers.add()
    }

    /// Snapshot of the currently tracked endpoints.
    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stops the watcher and every capture session. Idempotent; Drop calls
    /// it too.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                warn!("device watcher exited abnormally");
            }
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_watcher(
    settings: RegistrySettings,
    subscribers: Subscribers,
    endpoints: Arc<Mutex<Vec<EndpointInfo>>>,
    stop_flag: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let mut sessions: Vec<CaptureSession> = Vec::new();

    match enumerate_endpoints(&host) {
        Ok(seen) => {
            reconcile(&host, &settings, &subscribers, &mut sessions, seen);
            publish_snapshot(&endpoints, &sessions);
            info!("tracking {} render endpoint(s)", sessions.len());
        }
        Err(e) => warn!("initial endpoint enumeration failed: {}", e),
    }

    while !stop_flag.load(Ordering::Relaxed) {
        thread::sleep(POLL_INTERVAL);
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let seen = match enumerate_endpoints(&host) {
            Ok(seen) => seen,
            Err(e) => {
                debug!("endpoint enumeration failed, keeping current set: {}", e);
                continue;
            }
        };

        // Cheap fast-path: an unchanged count means an unchanged set.
        if seen.len() == sessions.len() {
            continue;
        }

        reconcile(&host, &settings, &subscribers, &mut sessions, seen);
        publish_snapshot(&endpoints, &sessions);
    }

    info!("stopping {} capture session(s)", sessions.len());
    for session in &mut sessions {
        session.stop();
    }
}

fn enumerate_endpoints(host: &cpal::Host) -> Result<Vec<(String, cpal::Device)>> {
    let mut endpoints = Vec::new();
    for device in host.output_devices()? {
        match device.name() {
            Ok(name) => endpoints.push((name, device)),
            Err(e) => debug!("skipping unnamed endpoint: {}", e),
        }
    }
    Ok(endpoints)
}

/// Brings the session set in line with the enumerated endpoints: sessions
/// whose id persists are kept untouched, vanished ones are stopped and
/// dropped, new ids get sessions (individual failures are skipped), and the
/// default designation is recomputed over the result.
fn reconcile(
    host: &cpal::Host,
    settings: &RegistrySettings,
    subscribers: &Subscribers,
    sessions: &mut Vec<CaptureSession>,
    seen: Vec<(String, cpal::Device)>,
) {
    let tracked: Vec<String> = sessions.iter().map(|s| s.endpoint_id().to_owned()).collect();
    let seen_ids: Vec<String> = seen.iter().map(|(id, _)| id.clone()).collect();
    let plan = reconcile_plan(&tracked, &seen_ids);
    debug!(
        "reconcile: {} kept, {} dropped, {} added",
        plan.kept.len(),
        plan.dropped.len(),
        plan.added.len()
    );

    for id in &plan.dropped {
        if let Some(pos) = sessions.iter().position(|s| s.endpoint_id() == id) {
            let mut session = sessions.remove(pos);
            session.stop();
            info!("endpoint `{}` removed, capture stopped", id);
        }
    }

    for (id, device) in seen {
        if !plan.added.contains(&id) {
            continue;
        }
        match CaptureSession::open(&device, false, subscribers.clone()) {
            Ok(session) => {
                info!("listening on endpoint `{}`", id);
                sessions.push(session);
            }
            Err(e) => warn!("skipping endpoint `{}`: {}", id, e),
        }
    }

    retag_default(host, settings, sessions);
}

struct ReconcilePlan {
    kept: Vec<String>,
    dropped: Vec<String>,
    added: Vec<String>,
}

/// Symmetric difference between tracked and enumerated endpoint ids.
fn reconcile_plan(tracked: &[String], seen: &[String]) -> ReconcilePlan {
    ReconcilePlan {
        kept: tracked.iter().filter(|id| seen.contains(id)).cloned().collect(),
        dropped: tracked.iter().filter(|id| !seen.contains(id)).cloned().collect(),
        added: seen.iter().filter(|id| !tracked.contains(id)).cloned().collect(),
    }
}

fn retag_default(host: &cpal::Host, settings: &RegistrySettings, sessions: &[CaptureSession]) {
    let platform_default = host.default_output_device().and_then(|d| d.name().ok());
    let ids: Vec<&str> = sessions.iter().map(|s| s.endpoint_id()).collect();
    let chosen = select_default(
        &ids,
        settings.default_output_override.as_deref(),
        platform_default.as_deref(),
    );

    for session in sessions {
        session.set_default(chosen == Some(session.endpoint_id()));
    }

    match chosen {
        Some(id) => debug!("default output is `{}`", id),
        None => warn!("no endpoint matches the default-output designation"),
    }
}

/// Picks which endpoint id carries the default-output tag.
///
/// A configured override wins outright: the first id containing the fragment
/// is chosen, and a miss leaves the designation unset (no fallback). Without
/// an override, the platform default output is matched by id.
fn select_default<'a>(
    ids: &[&'a str],
    override_fragment: Option<&str>,
    platform_default: Option<&str>,
) -> Option<&'a str> {
    if let Some(fragment) = override_fragment {
        return ids.iter().find(|id| id.contains(fragment)).copied();
    }
    let platform_default = platform_default?;
    ids.iter().find(|id| **id == platform_default).copied()
}

fn publish_snapshot(endpoints: &Arc<Mutex<Vec<EndpointInfo>>>, sessions: &[CaptureSession]) {
    let snapshot: Vec<EndpointInfo> = sessions
        .iter()
        .map(|s| EndpointInfo {
            id: s.endpoint_id().to_owned(),
            name: s.endpoint_id().to_owned(),
            is_default: s.is_default(),
        })
        .collect();

    if let Ok(mut endpoints) = endpoints.lock() {
        *endpoints = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconcile_plan_keeps_drops_and_adds() {
        let tracked = ids(&["Speakers", "Headphones"]);
        let seen = ids(&["Speakers", "HDMI Out"]);

        let plan = reconcile_plan(&tracked, &seen);
        assert_eq!(plan.kept, ids(&["Speakers"]));
        assert_eq!(plan.dropped, ids(&["Headphones"]));
        assert_eq!(plan.added, ids(&["HDMI Out"]));
    }

    #[test]
    fn reconcile_plan_removed_endpoint_leaves_survivor() {
        // Two endpoints, one unplugged mid-run.
        let tracked = ids(&["Speakers", "Headphones"]);
        let seen = ids(&["Speakers"]);

        let plan = reconcile_plan(&tracked, &seen);
        assert_eq!(plan.kept, ids(&["Speakers"]));
        assert_eq!(plan.dropped, ids(&["Headphones"]));
        assert!(plan.added.is_empty());
    }

    #[test]
    fn select_default_prefers_override_fragment() {
        let ids = ["Speakers (Realtek)", "VAIO3 Virtual Out"];
        let chosen = select_default(&ids, Some("VAIO3"), Some("Speakers (Realtek)"));
        assert_eq!(chosen, Some("VAIO3 Virtual Out"));
    }

    #[test]
    fn select_default_override_miss_leaves_unset() {
        let ids = ["Speakers (Realtek)"];
        let chosen = select_default(&ids, Some("VAIO3"), Some("Speakers (Realtek)"));
        assert_eq!(chosen, None);
    }

    #[test]
    fn select_default_falls_back_to_platform_device() {
        let ids = ["Speakers (Realtek)", "HDMI Out"];
        assert_eq!(
            select_default(&ids, None, Some("HDMI Out")),
            Some("HDMI Out")
        );
        assert_eq!(select_default(&ids, None, None), None);
        assert_eq!(select_default(&ids, None, Some("Unplugged")), None);
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let subscribers = Subscribers::default();
        let first = subscribers.add();
        let second = subscribers.add();
        assert_eq!(subscribers.len(), 2);

        subscribers.publish(SpectrumFrame::new(true, vec![0.0; 4]));
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());

        drop(first);
        subscribers.publish(SpectrumFrame::new(false, vec![0.0; 4]));
        assert_eq!(subscribers.len(), 1);
        assert!(second.try_recv().is_ok());
    }
}
