//! Named links between graphs.
//!
//! A `link-out` motion broadcasts every packet it receives to all `link-in`
//! producers attached under the same name. Graphs that should talk share one
//! [`LinkRegistry`]. Receivers attach when their graph starts and detach when
//! it stops.

use super::node::{Cleanup, Motion, Outlet, Producer};
use super::packet::{Config, Packet};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
struct LinkTable {
    next: u64,
    links: BTreeMap<String, Vec<(u64, Outlet)>>,
}

/// Shared table of link receivers.
#[derive(Clone, Default)]
pub struct LinkRegistry {
    inner: Rc<RefCell<LinkTable>>,
}

/// Returned by [`LinkRegistry::attach`]; hand it back to detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkToken {
    name: String,
    id: u64,
}

impl LinkToken {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, name: &str, outlet: Outlet) -> LinkToken {
        let mut table = self.inner.borrow_mut();
        table.next += 1;
        let id = table.next;
        table
            .links
            .entry(name.to_string())
            .or_default()
            .push((id, outlet));
        tracing::trace!(link = name, "Link receiver attached");
        LinkToken {
            name: name.to_string(),
            id,
        }
    }

    pub fn detach(&self, token: &LinkToken) -> bool {
        let mut table = self.inner.borrow_mut();
        let Some(receivers) = table.links.get_mut(&token.name) else {
            return false;
        };
        let before = receivers.len();
        receivers.retain(|(id, _)| *id != token.id);
        let removed = receivers.len() != before;
        if receivers.is_empty() {
            table.links.remove(&token.name);
        }
        removed
    }

    /// Deliver `packet` to every receiver of `name`. Returns how many were reached.
    ///
    /// The receiver list is copied before delivery, so receivers may attach or
    /// detach while the packet is in flight.
    pub fn broadcast(&self, name: &str, packet: Packet) -> usize {
        let receivers: Vec<Outlet> = {
            let table = self.inner.borrow();
            match table.links.get(name) {
                Some(list) => list
                    .iter()
                    .filter(|(_, o)| o.is_attached())
                    .map(|(_, o)| o.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        let Some((last, rest)) = receivers.split_last() else {
            tracing::trace!(link = name, "No receivers, packet dropped");
            return 0;
        };
        for outlet in rest {
            outlet.send(packet.clone());
        }
        last.send(packet);
        receivers.len()
    }

    pub fn receivers(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .links
            .get(name)
            .map_or(0, |list| list.len())
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().links.keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().links.clear();
    }

    pub fn ptr_eq(&self, other: &LinkRegistry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkRegistry")
            .field("links", &self.names())
            .finish()
    }
}

/// Terminal motion broadcasting to every `link_in` of the same name.
pub fn link_out(registry: &LinkRegistry, name: impl Into<String>) -> Motion {
    Motion::processor(broadcaster(registry.clone(), name.into()))
}

/// Producer receiving everything sent to `link_out` of the same name.
pub fn link_in(registry: &LinkRegistry, name: impl Into<String>) -> Producer {
    Producer::new(receiver(registry.clone(), name.into()))
}

/// `link-out` factory: configuration `{ "name": "..." }`.
pub fn link_out_factory(registry: &LinkRegistry) -> Motion {
    let registry = registry.clone();
    Motion::factory(move |config: &Config| {
        broadcaster(registry, configured_name("link-out", config))
    })
}

/// `link-in` factory: configuration `{ "name": "..." }`.
pub fn link_in_factory(registry: &LinkRegistry) -> Producer {
    let registry = registry.clone();
    Producer::factory(move |config: &Config| {
        receiver(registry, configured_name("link-in", config))
    })
}

fn broadcaster(registry: LinkRegistry, name: String) -> impl FnMut(&Outlet, Packet) {
    move |_: &Outlet, packet: Packet| {
        registry.broadcast(&name, packet);
    }
}

fn receiver(registry: LinkRegistry, name: String) -> impl FnMut(Outlet) -> Option<Cleanup> {
    move |outlet: Outlet| {
        let token = registry.attach(&name, outlet);
        let registry = registry.clone();
        Some(Box::new(move || {
            registry.detach(&token);
        }) as Cleanup)
    }
}

fn configured_name(kind: &str, config: &Config) -> String {
    link_name(config).unwrap_or_else(|| {
        tracing::warn!("{} configured without a name; using the unnamed link", kind);
        String::new()
    })
}

/// Read the `name` field of a link configuration.
pub(crate) fn link_name(config: &Config) -> Option<String> {
    config
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
