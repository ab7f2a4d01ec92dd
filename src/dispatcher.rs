//! Decodes notification payloads and fans the resulting events out to the
//! consumers registered per channel.
//!
//! The routing table (consumers, enabled channels, session generation) sits
//! behind one lock.  A dispatch decodes and snapshots the consumer list while
//! holding it, then calls the consumers after releasing it, so consumers may
//! freely subscribe, unsubscribe or query the session from inside a callback.
//!
//! A notification is delivered only if it belongs to the current session
//! generation and its channel is enabled.  Closing a session bumps the
//! generation, so anything still in flight from the old link is dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::parse::{
    decode_battery, decode_classifier, decode_emg, decode_emg_processed, decode_imu,
    decode_motion,
};
use crate::registry::Channel;
use crate::types::MyoEvent;

/// A registered event callback.
pub type Consumer = Arc<dyn Fn(&MyoEvent) + Send + Sync>;

/// Handle returned by [`Dispatcher::subscribe`], used to remove one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

struct Registration {
    id: ConsumerId,
    consumer: Consumer,
}

#[derive(Default)]
struct Routes {
    generation: u64,
    live: bool,
    enabled: BTreeSet<Channel>,
    consumers: HashMap<Channel, Vec<Registration>>,
    /// Next EMG frame number per EMG data channel.
    sequences: HashMap<Channel, u64>,
    next_id: u64,
    dropped: u64,
}

impl Routes {
    fn snapshot(&self, channel: Channel) -> Vec<Consumer> {
        self.consumers
            .get(&channel)
            .map(|regs| regs.iter().map(|r| Arc::clone(&r.consumer)).collect())
            .unwrap_or_default()
    }

    /// Every consumer exactly once, in registration order.
    fn unique(&self) -> Vec<Consumer> {
        let mut by_id: BTreeMap<ConsumerId, Consumer> = BTreeMap::new();
        for reg in self.consumers.values().flatten() {
            by_id
                .entry(reg.id)
                .or_insert_with(|| Arc::clone(&reg.consumer));
        }
        by_id.into_values().collect()
    }
}

/// Per-session notification router.
#[derive(Default)]
pub struct Dispatcher {
    routes: Mutex<Routes>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Consumer registry ─────────────────────────────────────────────────────

    /// Register `consumer` for one channel.
    pub fn subscribe(&self, channel: Channel, consumer: Consumer) -> ConsumerId {
        self.subscribe_many(&[channel], consumer)
    }

    /// Register one consumer for several channels under a single id.
    ///
    /// Lifecycle events reach it once, not once per channel.
    pub fn subscribe_many(&self, channels: &[Channel], consumer: Consumer) -> ConsumerId {
        let mut routes = self.routes.lock();
        let id = ConsumerId(routes.next_id);
        routes.next_id += 1;
        for &channel in channels {
            routes
                .consumers
                .entry(channel)
                .or_default()
                .push(Registration {
                    id,
                    consumer: Arc::clone(&consumer),
                });
        }
        id
    }

    /// Remove every consumer of `channel`.  Returns how many were removed.
    pub fn unsubscribe(&self, channel: Channel) -> usize {
        self.routes
            .lock()
            .consumers
            .remove(&channel)
            .map_or(0, |regs| regs.len())
    }

    /// Remove one consumer from every channel it was registered on.
    pub fn remove(&self, id: ConsumerId) {
        let mut routes = self.routes.lock();
        for regs in routes.consumers.values_mut() {
            regs.retain(|r| r.id != id);
        }
        routes.consumers.retain(|_, regs| !regs.is_empty());
    }

    pub fn consumer_count(&self, channel: Channel) -> usize {
        self.routes
            .lock()
            .consumers
            .get(&channel)
            .map_or(0, Vec::len)
    }

    // ── Session routing ───────────────────────────────────────────────────────

    /// Start routing for a new session and return its generation.
    pub fn open(&self) -> u64 {
        let mut routes = self.routes.lock();
        routes.generation += 1;
        routes.live = true;
        routes.enabled.clear();
        routes.sequences.clear();
        routes.generation
    }

    /// `true` while `generation` is the live session.
    pub fn is_current(&self, generation: u64) -> bool {
        let routes = self.routes.lock();
        routes.live && routes.generation == generation
    }

    /// Start delivering notifications on `channel`.  Returns `false` if the
    /// session has already ended.
    pub fn enable(&self, generation: u64, channel: Channel) -> bool {
        let mut routes = self.routes.lock();
        if !routes.live || routes.generation != generation {
            return false;
        }
        routes.enabled.insert(channel);
        true
    }

    /// Stop delivering notifications on `channel`.
    pub fn disable(&self, channel: Channel) {
        self.routes.lock().enabled.remove(&channel);
    }

    /// Channels currently enabled, in channel order.
    pub fn enabled(&self) -> Vec<Channel> {
        self.routes.lock().enabled.iter().copied().collect()
    }

    /// Notifications dropped because their session or channel was inactive.
    pub fn dropped(&self) -> u64 {
        self.routes.lock().dropped
    }

    /// End session `generation` and deliver `event` to every consumer.
    ///
    /// Idempotent: returns `false` and delivers nothing when that session is
    /// already closed.
    pub fn close(&self, generation: u64, event: MyoEvent) -> bool {
        let consumers = {
            let mut routes = self.routes.lock();
            if !routes.live || routes.generation != generation {
                return false;
            }
            routes.live = false;
            routes.generation += 1;
            routes.enabled.clear();
            routes.unique()
        };
        debug!("dispatcher: session {generation} closed with {event:?}");
        for consumer in &consumers {
            consumer(&event);
        }
        true
    }

    /// Deliver `event` to every consumer once.
    pub fn broadcast(&self, event: MyoEvent) {
        let consumers = self.routes.lock().unique();
        for consumer in &consumers {
            consumer(&event);
        }
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    /// Decode one notification and deliver the resulting events.
    ///
    /// Called from the session's pump in transport order, which is what
    /// keeps per-channel delivery FIFO.
    pub fn dispatch(&self, generation: u64, channel: Channel, payload: &[u8]) {
        let (events, consumers) = {
            let mut routes = self.routes.lock();
            if !routes.live || routes.generation != generation || !routes.enabled.contains(&channel)
            {
                routes.dropped += 1;
                debug!(
                    "dispatcher: dropped {} byte(s) on {channel:?} (session {generation} inactive)",
                    payload.len()
                );
                return;
            }
            let events = decode(&mut routes, channel, payload);
            (events, routes.snapshot(channel))
        };

        for event in &events {
            for consumer in &consumers {
                consumer(event);
            }
        }
    }
}

fn decode(routes: &mut Routes, channel: Channel, payload: &[u8]) -> Vec<MyoEvent> {
    let decoded = match channel {
        Channel::EmgData0 | Channel::EmgData1 | Channel::EmgData2 | Channel::EmgData3 => {
            decode_emg(payload).map(|(mut first, mut second)| {
                let next = routes.sequences.entry(channel).or_insert(0);
                first.sequence = *next;
                second.sequence = *next + 1;
                *next += 2;
                vec![
                    MyoEvent::Emg {
                        channel,
                        sample: first,
                    },
                    MyoEvent::Emg {
                        channel,
                        sample: second,
                    },
                ]
            })
        }
        Channel::ImuData => decode_imu(payload).map(|s| vec![MyoEvent::Imu(s)]),
        Channel::ClassifierEvent => {
            decode_classifier(payload).map(|e| vec![MyoEvent::Classifier(e)])
        }
        Channel::BatteryLevel => decode_battery(payload).map(|b| vec![MyoEvent::Battery(b)]),
        Channel::MotionEvent => decode_motion(payload).map(|m| vec![MyoEvent::Motion(m)]),
        Channel::EmgProcessed => {
            decode_emg_processed(payload).map(|e| vec![MyoEvent::EmgProcessed(e)])
        }
        Channel::Command | Channel::DeviceInfo | Channel::FirmwareVersion | Channel::DeviceName => {
            debug!("dispatcher: ignoring notification on read/write channel {channel:?}");
            return Vec::new();
        }
    };

    decoded.unwrap_or_else(|error| {
        warn!("dispatcher: malformed {channel:?} notification: {error}");
        vec![MyoEvent::Malformed { channel, error }]
    })
}
