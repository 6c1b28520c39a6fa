//! # Link registry
//!
//! Owns the pool of radio devices and every open link.
//!
//! ## Responsibilities
//!
//! - Keep named devices (duplex byte channels) and which link holds each.
//! - Open links on a free device with a fresh id; ids start at 1, id 0 is
//!   the registry itself.
//! - Close one link, every link (`reset`), or every link able to transmit
//!   (`silence`), returning its device to the pool.
//!
//! Links are closed outside the registry lock: closing joins worker threads
//! and may linger for unacknowledged frames.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::link::Link;

/// Identifier of an open link. Never reused within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub u32);

impl LinkId {
    /// The registry's own (control) id.
    pub const CONTROL: LinkId = LinkId(0);
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of the application surface a link exposes. The protocol
/// itself always runs in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkMode {
    Receive,
    Transmit,
    Duplex,
}

impl LinkMode {
    pub fn can_read(self) -> bool {
        matches!(self, LinkMode::Receive | LinkMode::Duplex)
    }

    pub fn can_write(self) -> bool {
        matches!(self, LinkMode::Transmit | LinkMode::Duplex)
    }
}

struct Device {
    channel: Arc<dyn Channel>,
    in_use_by: Option<LinkId>,
}

#[derive(Default)]
struct Inner {
    devices: BTreeMap<String, Device>,
    links: BTreeMap<LinkId, Arc<Link>>,
}

pub struct LinkRegistry {
    defaults: LinkConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU32,
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl LinkRegistry {
    /// Empty registry; `defaults` is used by [`open`](Self::open).
    pub fn new(defaults: LinkConfig) -> Self {
        LinkRegistry {
            defaults,
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU32::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Devices ────────────────────────────────────────────────────────

    pub fn register_device(&self, name: impl Into<String>, channel: Arc<dyn Channel>) -> Result<()> {
        let name = name.into();
        let mut inner = self.lock();
        if inner.devices.contains_key(&name) {
            return Err(LinkError::DuplicateDevice(name));
        }
        tracing::info!(device = %name, "device registered");
        inner.devices.insert(
            name,
            Device {
                channel,
                in_use_by: None,
            },
        );
        Ok(())
    }

    /// Remove an idle device from the pool.
    pub fn unregister_device(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        match inner.devices.get(name) {
            None => return Err(LinkError::UnknownDevice(name.to_owned())),
            Some(Device {
                in_use_by: Some(_), ..
            }) => return Err(LinkError::DeviceBusy(name.to_owned())),
            Some(_) => {}
        }
        inner.devices.remove(name);
        tracing::info!(device = %name, "device unregistered");
        Ok(())
    }

    /// All registered device names.
    pub fn devices(&self) -> Vec<String> {
        self.lock().devices.keys().cloned().collect()
    }

    /// Device names not held by any link.
    pub fn available_devices(&self) -> Vec<String> {
        self.lock()
            .devices
            .iter()
            .filter(|(_, d)| d.in_use_by.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    // ─── Links ──────────────────────────────────────────────────────────

    /// Open a link on the first free device with the registry defaults.
    pub fn open(&self, mode: LinkMode) -> Result<Arc<Link>> {
        self.open_with(mode, self.defaults.clone())
    }

    /// Open a link on the first free device.
    pub fn open_with(&self, mode: LinkMode, config: LinkConfig) -> Result<Arc<Link>> {
        let name = self
            .available_devices()
            .into_iter()
            .next()
            .ok_or(LinkError::NoDevice)?;
        self.open_on(&name, mode, config)
    }

    /// Open a link on a named device.
    pub fn open_on(&self, device: &str, mode: LinkMode, config: LinkConfig) -> Result<Arc<Link>> {
        let id = LinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let channel = {
            let mut inner = self.lock();
            let entry = inner
                .devices
                .get_mut(device)
                .ok_or_else(|| LinkError::UnknownDevice(device.to_owned()))?;
            if entry.in_use_by.is_some() {
                return Err(LinkError::DeviceBusy(device.to_owned()));
            }
            entry.in_use_by = Some(id);
            entry.channel.clone()
        };

        let link = match Link::open(id, mode, device, channel, config) {
            Ok(link) => Arc::new(link),
            Err(e) => {
                self.release_device(id);
                return Err(e);
            }
        };
        self.lock().links.insert(id, link.clone());
        Ok(link)
    }

    pub fn get(&self, id: LinkId) -> Option<Arc<Link>> {
        self.lock().links.get(&id).cloned()
    }

    /// Ids of all open links, ascending.
    pub fn links(&self) -> Vec<LinkId> {
        self.lock().links.keys().copied().collect()
    }

    /// Close one link and return its device to the pool.
    pub fn close(&self, id: LinkId) -> Result<()> {
        let link = self.lock().links.remove(&id).ok_or(LinkError::UnknownLink(id))?;
        let result = link.close();
        self.release_device(id);
        result
    }

    /// Close every link.
    pub fn reset(&self) -> usize {
        self.close_matching(|_| true)
    }

    /// Close every link that can transmit. Returns how many were closed.
    pub fn silence(&self) -> usize {
        self.close_matching(|link| link.mode().can_write())
    }

    fn close_matching(&self, pred: impl Fn(&Link) -> bool) -> usize {
        let victims: Vec<LinkId> = self
            .lock()
            .links
            .iter()
            .filter(|(_, link)| pred(link))
            .map(|(id, _)| *id)
            .collect();
        let mut closed = 0;
        for id in victims {
            match self.close(id) {
                Ok(()) => closed += 1,
                Err(LinkError::UnknownLink(_)) => {}
                Err(e) => {
                    closed += 1;
                    tracing::warn!(link = %id, error = %e, "link close failed");
                }
            }
        }
        if closed > 0 {
            tracing::info!(closed, "links closed");
        }
        closed
    }

    fn release_device(&self, id: LinkId) {
        let mut inner = self.lock();
        if let Some(device) = inner.devices.values_mut().find(|d| d.in_use_by == Some(id)) {
            device.in_use_by = None;
        }
    }
}

impl Drop for LinkRegistry {
    fn drop(&mut self) {
        self.reset();
    }
}
