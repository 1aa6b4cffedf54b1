use std::{collections::HashSet, fmt::Display};

use kube::{
    runtime::{
        reflector::{ObjectRef, Store},
        watcher::Event,
    },
    ResourceExt,
};
use log::debug;
use neutron_fip_core::{helpers::resource_key, resources::crd::v1::port::Port};

pub mod reconciler;

/// Work scheduled for a single port, identified by its `namespace/name` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortWorkItem {
    Add(String),
    /// carries the provider id, the port itself is gone by the time it's handled
    Delete { key: String, provider_id: String },
    Update(String),
    /// releases the provider port of a deleting port, then drops the finalizer
    Finalize(String),
}

impl Display for PortWorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortWorkItem::Add(key) => write!(f, "add port {key}"),
            PortWorkItem::Delete { key, provider_id } => {
                write!(f, "delete port {key} ({provider_id})")
            }
            PortWorkItem::Update(key) => write!(f, "update port {key}"),
            PortWorkItem::Finalize(key) => write!(f, "finalize port {key}"),
        }
    }
}

fn port_key(port: &Port) -> Option<String> {
    Some(resource_key(port.metadata.namespace.as_deref()?, port.metadata.name.as_deref()?))
}

fn on_applied(port: &Port, previous: Option<&Port>) -> Option<PortWorkItem> {
    let key = port_key(port)?;

    if port.is_deleting() {
        return port.has_cleanup_finalizer().then_some(PortWorkItem::Finalize(key));
    }

    match previous {
        None if !port.is_created() || !port.has_cleanup_finalizer() => Some(PortWorkItem::Add(key)),
        None => None,
        Some(previous) if previous.spec != port.spec => Some(PortWorkItem::Update(key)),
        Some(_) => None,
    }
}

/// Only ports that vanished without being finalized still need their
/// provider port released.
fn on_deleted(port: &Port) -> Option<PortWorkItem> {
    let key = port_key(port)?;

    if port.is_deleting() {
        debug!("Port {key} was finalized before deletion");
        return None;
    }

    match port.provider_id() {
        Some(provider_id) => Some(PortWorkItem::Delete {
            key,
            provider_id: provider_id.to_owned(),
        }),
        None => {
            debug!("Port {key} was never created, nothing to release");
            None
        }
    }
}

/// Translates a port watch event into work items. `store` still holds the
/// state from before the event.
pub fn route_port_event(event: &Event<Port>, store: &Store<Port>) -> Vec<PortWorkItem> {
    let previous = |port: &Port| store.get(&ObjectRef::from_obj(port));

    match event {
        Event::Applied(port) => on_applied(port, previous(port).as_deref())
            .into_iter()
            .collect(),
        Event::Deleted(port) => on_deleted(port).into_iter().collect(),
        Event::Restarted(ports) => {
            let listed = ports
                .iter()
                .map(|p| (p.namespace(), p.name_any()))
                .collect::<HashSet<_>>();

            let missing = store
                .state()
                .into_iter()
                .filter(|p| !listed.contains(&(p.namespace(), p.name_any())))
                .filter_map(|p| on_deleted(&p));

            ports
                .iter()
                .filter_map(|port| on_applied(port, previous(port).as_deref()))
                .chain(missing)
                .collect()
        }
    }
}
