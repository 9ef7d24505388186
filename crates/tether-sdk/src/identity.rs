//! Object identity cache
//!
//! Maps native addresses to the proxy currently representing them. The cache
//! holds proxies weakly: it never keeps a proxy alive on its own, so once the
//! scripting side drops every handle the slot is dead and the next bind of
//! that address creates a fresh proxy.
//!
//! Handles are confined to the thread that created them, and a proxy is
//! marked in use for the length of every member access so a method cannot
//! reach its own object again through the bridge.

use crate::error::{BridgeError, BridgeResult};
use crate::meta::ClassMetadata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Script-side representative of one native object
pub struct Proxy {
    address: usize,
    meta: Arc<ClassMetadata>,
    detached: AtomicBool,
    in_use: AtomicBool,
}

/// Shared handle to a proxy. Equality is proxy identity.
///
/// Not `Send`: scripts run on one thread and so do their handles.
#[derive(Clone)]
pub struct ProxyHandle(Arc<Proxy>, PhantomData<*const ()>);

/// Marks a proxy in use until dropped
pub(crate) struct InUse<'a>(&'a Proxy);

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        self.0.in_use.store(false, Ordering::Release);
    }
}

impl ProxyHandle {
    /// Native address the proxy is bound to
    pub fn address(&self) -> usize {
        self.0.address
    }

    /// Class metadata of the bound object
    pub fn meta(&self) -> &Arc<ClassMetadata> {
        &self.0.meta
    }

    /// Meta name of the bound object's class
    pub fn meta_name(&self) -> &'static str {
        self.0.meta.name()
    }

    /// True once the host invalidated the native object
    pub fn is_detached(&self) -> bool {
        self.0.detached.load(Ordering::Acquire)
    }

    /// Number of live handles to this proxy
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True while a member access through this proxy is running
    pub fn is_in_use(&self) -> bool {
        self.0.in_use.load(Ordering::Acquire)
    }

    /// Claim the native object for one member access.
    ///
    /// Fails with `Detached` once the object is gone and with `Busy` while
    /// another access through the same proxy is still running.
    pub(crate) fn enter(&self) -> BridgeResult<InUse<'_>> {
        if self.is_detached() {
            return Err(BridgeError::Detached {
                class: self.meta_name(),
                address: self.address(),
            });
        }
        if self
            .0
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(BridgeError::Busy {
                class: self.meta_name(),
                address: self.address(),
            });
        }
        Ok(InUse(&self.0))
    }

    fn new(proxy: Arc<Proxy>) -> Self {
        ProxyHandle(proxy, PhantomData)
    }
}

impl PartialEq for ProxyHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProxyHandle({} @ {:#x}", self.meta_name(), self.address())?;
        if self.is_detached() {
            write!(f, ", detached")?;
        }
        write!(f, ")")
    }
}

/// Weak map from native address to live proxy
pub struct ObjectCache {
    slots: Mutex<HashMap<usize, Weak<Proxy>>>,
}

impl ObjectCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Live proxy for `address`, if any
    pub fn lookup(&self, address: usize) -> Option<ProxyHandle> {
        self.slots
            .lock()
            .get(&address)
            .and_then(Weak::upgrade)
            .map(ProxyHandle::new)
    }

    /// Return the live proxy for `address` or create one bound to `meta`.
    ///
    /// A live proxy of a different class for the same address is an
    /// `AliasedPointer` error; a dead slot is simply replaced.
    pub fn get_or_insert(&self, address: usize, meta: &Arc<ClassMetadata>) -> BridgeResult<ProxyHandle> {
        let mut slots = self.slots.lock();
        if let Some(live) = slots.get(&address).and_then(Weak::upgrade) {
            if live.meta.type_id() != meta.type_id() {
                log::warn!(
                    "refusing to bind {:#x} as {}: already bound as {}",
                    address,
                    meta.name(),
                    live.meta.name()
                );
                return Err(BridgeError::AliasedPointer {
                    address,
                    bound: live.meta.name(),
                    requested: meta.name(),
                });
            }
            return Ok(ProxyHandle::new(live));
        }

        let proxy = Arc::new(Proxy {
            address,
            meta: Arc::clone(meta),
            detached: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
        });
        slots.insert(address, Arc::downgrade(&proxy));
        log::trace!("new proxy {} @ {:#x}", meta.name(), address);
        Ok(ProxyHandle::new(proxy))
    }

    /// Drop every dead slot; returns how many were removed
    pub fn collect(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - slots.len();
        if removed > 0 {
            log::debug!("collected {} dead proxy slots", removed);
        }
        removed
    }

    /// Finalizer hook: remove the slot for `address` if its proxy is dead.
    ///
    /// Returns true if a slot was removed. A live proxy is left in place, so
    /// a late finalizer cannot evict a proxy created after the old one died.
    pub fn finalize(&self, address: usize) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(&address) {
            Some(weak) if weak.strong_count() == 0 => {
                slots.remove(&address);
                true
            }
            _ => false,
        }
    }

    /// Host hook for a destroyed native object: detach its proxy and free the
    /// slot. Returns true if a live proxy was detached.
    pub fn invalidate(&self, address: usize) -> bool {
        let removed = self.slots.lock().remove(&address);
        match removed.as_ref().and_then(Weak::upgrade) {
            Some(proxy) => {
                proxy.detached.store(true, Ordering::Release);
                log::debug!("detached proxy {} @ {:#x}", proxy.meta.name(), address);
                true
            }
            None => false,
        }
    }

    /// Number of slots, live or dead
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the cache has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Number of slots whose proxy is still alive
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}
