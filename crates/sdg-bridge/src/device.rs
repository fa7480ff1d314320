// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logger model, per-device state, and the device registry.
//!
//! A `Device` pairs immutable identity (platform ID, upstream lookup ID,
//! model) with mutable state behind a per-device async mutex. That mutex is
//! the single-owner gate: whoever holds it owns the fetch, the channel map,
//! and the schedule. The registry only ever grows during a run.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::DeviceRecord;
use crate::schedule::Schedule;

/// Device construction errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown logger model: {0}")]
    UnknownModel(String),
}

/// Closed set of supported logger models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    IotsuN3Aq05,
    IotsuN3Rhtemp,
}

impl DeviceModel {
    /// Channel tags this model transmits, in emit order.
    pub fn channel_tags(self) -> &'static [&'static str] {
        match self {
            Self::IotsuN3Aq05 => &["CO2", "Humidity", "Temperature"],
            Self::IotsuN3Rhtemp => &["Humidity", "Temperature"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IotsuN3Aq05 => "IOTSU_N3_AQ05",
            Self::IotsuN3Rhtemp => "IOTSU_N3_RHTEMP",
        }
    }
}

impl FromStr for DeviceModel {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IOTSU_N3_AQ05" => Ok(Self::IotsuN3Aq05),
            "IOTSU_N3_RHTEMP" => Ok(Self::IotsuN3Rhtemp),
            other => Err(DeviceError::UnknownModel(other.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display unit used when creating a channel on the platform.
pub fn resolve_unit(tag: &str) -> String {
    match tag.to_uppercase().as_str() {
        "TEMPERATURE" => "°C".to_string(),
        "HUMIDITY" => "%RH".to_string(),
        "CO2" => "CO2".to_string(),
        _ => tag.to_string(),
    }
}

/// A named measurement stream on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u64,
    pub tag: String,
}

/// Mutable per-device state, guarded by the device mutex.
#[derive(Debug)]
pub struct DeviceState {
    pub channels: Vec<Channel>,
    channel_id_by_tag: HashMap<String, u64>,
    pub schedule: Schedule,
}

impl DeviceState {
    fn new(channels: Vec<Channel>, schedule: Schedule) -> Self {
        let channel_id_by_tag = channels.iter().map(|c| (c.tag.clone(), c.id)).collect();
        Self {
            channels,
            channel_id_by_tag,
            schedule,
        }
    }

    /// Channel ID for `tag`, if known.
    pub fn channel_id(&self, tag: &str) -> Option<u64> {
        self.channel_id_by_tag.get(tag).copied()
    }

    /// Record a channel discovered or created after construction.
    ///
    /// Tags stay unique: a second insert for an existing tag is ignored.
    pub fn add_channel(&mut self, id: u64, tag: &str) {
        if self.channel_id_by_tag.contains_key(tag) {
            return;
        }
        self.channel_id_by_tag.insert(tag.to_string(), id);
        self.channels.push(Channel {
            id,
            tag: tag.to_string(),
        });
    }
}

/// One logger known to the bridge.
#[derive(Debug)]
pub struct Device {
    /// Platform logger ID.
    pub id: u64,
    /// Upstream lookup ID (serial/IMEI).
    pub lookup_id: u64,
    pub model: DeviceModel,
    generation: AtomicU64,
    pub state: Mutex<DeviceState>,
}

impl Device {
    /// Build a device from a platform record; `due_at` is the first poll
    /// time. Fails on an unrecognized model tag.
    pub fn from_record(record: &DeviceRecord, due_at: u64) -> Result<Self, DeviceError> {
        let model = record.tag.parse::<DeviceModel>()?;
        let channels = record
            .channels
            .iter()
            .map(|c| Channel {
                id: c.id,
                tag: c.tag.clone(),
            })
            .collect();

        Ok(Self {
            id: record.id,
            lookup_id: record.lookup_id,
            model,
            generation: AtomicU64::new(0),
            state: Mutex::new(DeviceState::new(
                channels,
                Schedule::new(record.last_seen, due_at),
            )),
        })
    }

    /// Current heap-entry generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate all queued heap entries and return the new generation.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Authoritative map of known devices. Devices are inserted at most once
/// and never removed during a run.
#[derive(Default)]
pub struct Registry {
    devices: DashMap<u64, Arc<Device>>,
    known: parking_lot::Mutex<HashSet<u64>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `device` unless its ID is already present. Returns whether it
    /// was inserted.
    pub fn insert(&self, device: Arc<Device>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.devices.entry(device.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                self.known.lock().insert(device.id);
                vacant.insert(device);
                true
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<Device>> {
        self.devices.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.devices.contains_key(&id)
    }

    /// Snapshot of every ID ever inserted.
    pub fn known_ids(&self) -> HashSet<u64> {
        self.known.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
