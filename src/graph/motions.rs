//! Ready-made motions for the common cases.

use super::node::{Motion, Outlet};
use super::packet::Packet;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Replace each packet with `f(packet)`.
pub fn map<F>(mut f: F) -> Motion
where
    F: FnMut(Packet) -> Packet + 'static,
{
    Motion::processor(move |out: &Outlet, packet: Packet| out.send(f(packet)))
}

/// Forward only packets for which `predicate` holds.
pub fn filter<F>(mut predicate: F) -> Motion
where
    F: FnMut(&Packet) -> bool + 'static,
{
    Motion::processor(move |out: &Outlet, packet: Packet| {
        if predicate(&packet) {
            out.send(packet);
        }
    })
}

/// Look at each packet, then forward it unchanged.
pub fn tap<F>(mut f: F) -> Motion
where
    F: FnMut(&Packet) + 'static,
{
    Motion::processor(move |out: &Outlet, packet: Packet| {
        f(&packet);
        out.send(packet);
    })
}

/// Consume each packet.
pub fn sink<F>(mut f: F) -> Motion
where
    F: FnMut(Packet) + 'static,
{
    Motion::processor(move |_: &Outlet, packet: Packet| f(packet))
}

/// Packets gathered by a [`collect`] sink.
#[derive(Clone, Default)]
pub struct Collected {
    packets: Rc<RefCell<Vec<Packet>>>,
}

impl Collected {
    pub fn len(&self) -> usize {
        self.packets.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.borrow().is_empty()
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.packets.borrow().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.packets
            .borrow()
            .iter()
            .map(|p| p.payload().clone())
            .collect()
    }

    /// Remove and return everything gathered so far.
    pub fn take(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.packets.borrow_mut())
    }
}

/// A sink that records every packet it receives.
pub fn collect() -> (Motion, Collected) {
    let collected = Collected::default();
    let store = collected.packets.clone();
    (sink(move |p| store.borrow_mut().push(p)), collected)
}
