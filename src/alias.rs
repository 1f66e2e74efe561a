// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Per-connection topic-alias table.
///
/// Indexed 1..=size; slot 0 is never used so alias values can index
/// directly as `table[alias - 1]` without an off-by-one at the call site.
#[derive(Debug, Clone)]
pub struct TopicAliasTable {
    slots: Vec<Option<String>>,
}

impl TopicAliasTable {
    /// `size` is the `topic_alias_maximum` advertised to this client in
    /// CONNACK; 0 means the client may not use topic aliases at all.
    #[must_use]
    pub fn new(size: u16) -> Self {
        Self {
            slots: vec![None; size as usize],
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the topic bound to `alias`, if any. `alias` is the raw
    /// on-the-wire value (1-indexed); out-of-range aliases return `None`
    /// rather than panicking, leaving the caller to map that to
    /// `TOPIC_ALIAS_INVALID`.
    #[must_use]
    pub fn get(&self, alias: u16) -> Option<&str> {
        let index = usize::from(alias).checked_sub(1)?;
        self.slots.get(index)?.as_deref()
    }

    /// Binds `alias` to `topic`, returning the topic previously bound to
    /// that slot (if any) so the caller can release its usage from the
    /// global limiter.
    pub fn set(&mut self, alias: u16, topic: String) -> Option<String> {
        let index = usize::from(alias) - 1;
        self.slots[index].replace(topic)
    }

    #[must_use]
    pub fn in_range(&self, alias: u16) -> bool {
        usize::from(alias) >= 1 && usize::from(alias) <= self.slots.len()
    }
}

/// Process-wide registry tracking total bytes held in live topic-alias
/// bindings, enforcing a configured hard byte limit.
///
/// Backed by a concurrent per-topic reference count (`DashMap`) plus an
/// atomic running total, rather than a single `Mutex<HashMap<_, _>>`: many
/// connection tasks touch this on every PUBLISH that carries a topic
/// alias, and serializing them all behind one lock would turn it into a
/// contention point on the decode hot path.
#[derive(Debug, Clone)]
pub struct GlobalAliasLimiter {
    usage: Arc<DashMap<String, usize>>,
    total_bytes: Arc<AtomicUsize>,
    hard_limit_bytes: usize,
}

impl GlobalAliasLimiter {
    #[must_use]
    pub fn new(hard_limit_bytes: usize) -> Self {
        Self {
            usage: Arc::new(DashMap::new()),
            total_bytes: Arc::new(AtomicUsize::new(0)),
            hard_limit_bytes,
        }
    }

    /// Records one more alias binding for `topic`, adding its byte length
    /// to the running total on first use.
    pub fn add_usage(&self, topic: &str) {
        let mut entry = self.usage.entry(topic.to_string()).or_insert(0);
        *entry += 1;
        if *entry == 1 {
            self.total_bytes.fetch_add(topic.len(), Ordering::SeqCst);
        }
    }

    /// Releases one alias binding for `topic`, removing its byte
    /// contribution once no binding references it anymore.
    pub fn remove_usage(&self, topic: &str) {
        let Some(mut entry) = self.usage.get_mut(topic) else {
            return;
        };
        *entry -= 1;
        let now_zero = *entry == 0;
        drop(entry);
        if now_zero {
            self.usage.remove(topic);
            self.total_bytes.fetch_sub(topic.len(), Ordering::SeqCst);
        }
    }

    /// True once the tracked byte total exceeds the configured hard limit.
    ///
    /// Deliberately observes the latest value rather than taking a lock
    /// across the whole add-then-check sequence: other connections are
    /// free to be concurrently mutating usage, and the decoder's contract
    /// is "mutate, then check", not "check under an exclusive lock".
    #[must_use]
    pub fn limit_exceeded(&self) -> bool {
        self.total_bytes.load(Ordering::SeqCst) > self.hard_limit_bytes
    }
}
