//! Route table: one entry per registered message type.

use std::collections::HashMap;

use crate::dispatch::{Handler, Middleware};
use crate::error::RouteConflict;
use crate::schema::SchemaDescriptor;

pub struct RouteEntry<S> {
    pub descriptor: SchemaDescriptor,
    pub middlewares: Vec<Middleware<S>>,
    pub handler: Handler<S>,
}

/// How `merge`/`mount` resolve a type name present in both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Reject the whole merge on the first conflict.
    Error,
    /// Keep the receiver's existing entry, drop the incoming one.
    Skip,
    /// Overwrite the receiver's entry with the incoming one.
    Replace,
}

#[derive(Default)]
pub struct RouteTable<S> {
    entries: HashMap<String, RouteEntry<S>>,
}

impl<S> RouteTable<S> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Direct registration is a programmer action taken once at startup;
    /// a duplicate is a typo, not a runtime condition to negotiate, so this
    /// panics rather than returning a `Result` a caller might ignore.
    pub fn register(&mut self, type_name: String, entry: RouteEntry<S>) {
        if self.entries.contains_key(&type_name) {
            panic!("route conflict: type `{type_name}` already registered");
        }
        self.entries.insert(type_name, entry);
    }

    pub fn get(&self, type_name: &str) -> Option<&RouteEntry<S>> {
        self.entries.get(type_name)
    }

    pub fn has(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Combines two independently-built tables. Unlike `register`, conflicts
    /// here are an expected runtime condition (composing modules authored
    /// separately), so the caller picks the policy and gets a `Result` back
    /// instead of a panic.
    ///
    /// Under `MergePolicy::Error`, validates every key for a conflict before
    /// mutating `self` at all: rejecting the whole merge on the first
    /// conflict must not leave a partial, order-dependent result behind
    /// (`other.entries` is a `HashMap`, so iteration order is unspecified).
    pub fn merge(&mut self, other: RouteTable<S>, policy: MergePolicy) -> Result<(), RouteConflict> {
        if policy == MergePolicy::Error {
            if let Some(type_name) = other.entries.keys().find(|k| self.entries.contains_key(*k)) {
                return Err(RouteConflict { type_name: type_name.clone() });
            }
        }
        for (type_name, entry) in other.entries {
            match (self.entries.contains_key(&type_name), policy) {
                (false, _) => {
                    self.entries.insert(type_name, entry);
                }
                (true, MergePolicy::Error) => {
                    unreachable!("conflicts were already rejected above before any mutation");
                }
                (true, MergePolicy::Skip) => {}
                (true, MergePolicy::Replace) => {
                    self.entries.insert(type_name, entry);
                }
            }
        }
        Ok(())
    }

    /// `mount` is a pure string transform over `other`'s keys followed by an
    /// ordinary merge — no separate code path.
    pub fn mount(&mut self, prefix: &str, other: RouteTable<S>, policy: MergePolicy) -> Result<(), RouteConflict> {
        let prefixed = RouteTable {
            entries: other
                .entries
                .into_iter()
                .map(|(type_name, entry)| (format!("{prefix}{type_name}"), entry))
                .collect(),
        };
        self.merge(prefixed, policy)
    }
}
