//! Presence-subscription sets ("OHI": who is notifying whom).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::error;

/// One publisher's subscription set: the uids it notifies, and a
/// refcount equal to its online node count. The set lives exactly as
/// long as the refcount stays positive.
pub struct OhiSet {
    uids: RwLock<HashMap<String, bool>>,
    refcount: AtomicI32,
}

impl OhiSet {
    /// Sets the subscription flag for `to`, returning whether the value
    /// transitioned.
    pub fn edit(&self, to: &str, subscribed: bool) -> bool {
        let mut uids = self.uids.write().expect("lock poisoned");
        let old = uids.insert(to.to_string(), subscribed).unwrap_or(false);
        old != subscribed
    }
}

/// Process-wide map from publisher uid to its [`OhiSet`].
#[derive(Default)]
pub struct OhiRegistry {
    from: RwLock<HashMap<String, Arc<OhiSet>>>,
}

impl OhiRegistry {
    /// Creates an empty registry.
    pub fn new() -> OhiRegistry {
        OhiRegistry::default()
    }

    /// References the publisher's set for one online node, creating it
    /// on the first.
    pub fn ref_publisher(&self, from: &str) -> Arc<OhiSet> {
        if let Some(set) = self.from.read().expect("lock poisoned").get(from) {
            set.refcount.fetch_add(1, Ordering::AcqRel);
            return set.clone();
        }
        let mut map = self.from.write().expect("lock poisoned");
        match map.get(from) {
            Some(raced) => {
                raced.refcount.fetch_add(1, Ordering::AcqRel);
                raced.clone()
            }
            None => {
                let set = Arc::new(OhiSet {
                    uids: RwLock::new(HashMap::new()),
                    refcount: AtomicI32::new(1),
                });
                map.insert(from.to_string(), set.clone());
                set
            }
        }
    }

    /// Releases one node's reference. When the last drops, the set is
    /// removed and the uids still subscribed are returned so the caller
    /// can send offline notes.
    pub fn unref_publisher(&self, from: &str) -> Vec<String> {
        let remaining = {
            let map = self.from.read().expect("lock poisoned");
            let Some(set) = map.get(from) else {
                error!(publisher = from, "unref of unknown ohi publisher");
                return Vec::new();
            };
            set.refcount.fetch_sub(1, Ordering::AcqRel) - 1
        };
        if remaining != 0 {
            return Vec::new();
        }

        let mut map = self.from.write().expect("lock poisoned");
        let Some(set) = map.remove(from) else { return Vec::new() };
        if set.refcount.load(Ordering::Acquire) != 0 {
            // A login raced the teardown; the set stays.
            map.insert(from.to_string(), set);
            return Vec::new();
        }
        let uids = set.uids.read().expect("lock poisoned");
        uids.iter()
            .filter(|(_, &subscribed)| subscribed)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// The publishers currently notifying `uid`; used at login to seed
    /// the client's presence list.
    pub fn get_ohi_to(&self, uid: &str) -> Vec<String> {
        let map = self.from.read().expect("lock poisoned");
        let mut publishers: Vec<String> = map
            .iter()
            .filter(|(_, set)| {
                set.uids
                    .read()
                    .expect("lock poisoned")
                    .get(uid)
                    .copied()
                    .unwrap_or(false)
            })
            .map(|(from, _)| from.clone())
            .collect();
        publishers.sort_unstable();
        publishers
    }
}
