//! The item graph: items plus the links between their ports.
//!
//! `ItemGraph` is the host-side owner of every item. It creates items by type,
//! wires outputs to inputs (type-checked), tears links down when items go
//! away and starts/stops execution contexts in bulk. Data itself never flows
//! through the graph: once wired, outputs notify inputs directly.

use crate::pipeline::bridge::{EventBridge, EventSink};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{ItemId, PortId};
use crate::pipeline::item::{ItemHandle, ItemOptions, ItemState, ItemType};
use crate::pipeline::param::ParamDescriptor;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::registry::ItemRegistry;
use serde::Serialize;

/// A wired output → input pair.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    from: ItemId,
    output: String,
    to: ItemId,
    input: String,
}

/// Serializable view of one item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub type_name: String,
    pub state: ItemState,
    pub ports: Vec<PortDescriptor>,
    pub params: Vec<ParamDescriptor>,
}

/// Serializable view of one link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub from: PortId,
    pub to: PortId,
    pub from_item: ItemId,
    pub output: String,
    pub to_item: ItemId,
    pub input: String,
}

/// Serializable view of the whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub items: Vec<ItemSnapshot>,
    pub links: Vec<LinkSnapshot>,
}

pub struct ItemGraph {
    registry: ItemRegistry,
    options: ItemOptions,
    events: EventSink,
    /// Indexed by `ItemId`; removed items leave a hole so ids stay stable.
    items: Vec<Option<ItemHandle>>,
    links: Vec<Link>,
}

impl ItemGraph {
    /// New empty graph and the bridge its items report to.
    pub fn new(
        registry: ItemRegistry,
        options: ItemOptions,
        event_capacity: usize,
    ) -> (Self, EventBridge) {
        let (bridge, events) = EventBridge::new(event_capacity);
        let graph = Self {
            registry,
            options,
            events,
            items: Vec::new(),
            links: Vec::new(),
        };
        (graph, bridge)
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    /// Ids must stay packable into a `PortId`.
    fn next_id(&self) -> PipelineResult<ItemId> {
        u32::try_from(self.items.len())
            .ok()
            .filter(|&index| index < PortId::MAX_ITEMS)
            .map(ItemId)
            .ok_or(PipelineError::GraphFull(self.items.len()))
    }

    fn insert(&mut self, handle: ItemHandle) -> ItemId {
        let id = handle.id();
        self.items.push(Some(handle));
        tracing::info!("Added item {:?}", id);
        id
    }

    /// Add an item of a statically known type.
    pub fn add_item<I: ItemType>(&mut self) -> PipelineResult<ItemId> {
        let handle = ItemHandle::new::<I>(
            self.next_id()?,
            self.options.clone(),
            Some(self.events.clone()),
        );
        Ok(self.insert(handle))
    }

    /// Add an item by its registered type name.
    pub fn add_by_type_name(&mut self, type_name: &str) -> PipelineResult<ItemId> {
        let info = *self.registry.get(type_name)?;
        let handle = ItemHandle::from_factory(
            self.next_id()?,
            info.name,
            info.factory,
            self.options.clone(),
            Some(self.events.clone()),
        );
        Ok(self.insert(handle))
    }

    pub fn item(&self, id: ItemId) -> PipelineResult<&ItemHandle> {
        self.items
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(PipelineError::UnknownItem(id))
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemHandle> {
        self.items.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.items().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop `id`, unhook every link touching it and drop it from the graph.
    pub fn remove_item(&mut self, id: ItemId) -> PipelineResult<()> {
        let handle = self.item(id)?.clone();
        handle.stop();

        for input in handle.inputs() {
            input.set_source(None)?;
        }

        let (touching, kept): (Vec<Link>, Vec<Link>) = self
            .links
            .drain(..)
            .partition(|l| l.from == id || l.to == id);
        self.links = kept;

        for link in touching.iter().filter(|l| l.from == id) {
            if let Some(input) = self.item(link.to).ok().and_then(|h| h.input(&link.input)) {
                input.set_source(None)?;
            }
        }

        self.items[id.index()] = None;
        tracing::info!("Removed item {:?}", id);
        Ok(())
    }

    /// Wire `from`'s output to `to`'s input, replacing whatever fed that input.
    pub fn connect(&mut self, from: (ItemId, &str), to: (ItemId, &str)) -> PipelineResult<()> {
        let (from_id, output_name) = from;
        let (to_id, input_name) = to;

        let source = self.item(from_id)?;
        let output = match source.output(output_name) {
            Some(output) => output.clone(),
            None if source.input(output_name).is_some() => {
                return Err(PipelineError::PortMismatch(format!(
                    "'{}' on {:?} is an input, not an output",
                    output_name, from_id
                )))
            }
            None => return Err(unknown_port(from_id, output_name)),
        };

        let target = self.item(to_id)?;
        let input = match target.input(input_name) {
            Some(input) => input.clone(),
            None if target.output(input_name).is_some() => {
                return Err(PipelineError::PortMismatch(format!(
                    "'{}' on {:?} is an output, not an input",
                    input_name, to_id
                )))
            }
            None => return Err(unknown_port(to_id, input_name)),
        };

        input.set_source(Some(&output))?;

        self.links
            .retain(|l| !(l.to == to_id && l.input == input_name));
        self.links.push(Link {
            from: from_id,
            output: output_name.to_string(),
            to: to_id,
            input: input_name.to_string(),
        });
        tracing::info!(
            "Added link {:?}.{} -> {:?}.{}",
            from_id,
            output_name,
            to_id,
            input_name
        );
        Ok(())
    }

    /// Clear whatever feeds `to`'s input. Returns whether a link existed.
    pub fn disconnect(&mut self, to: (ItemId, &str)) -> PipelineResult<bool> {
        let (to_id, input_name) = to;
        let input = self
            .item(to_id)?
            .input(input_name)
            .ok_or_else(|| unknown_port(to_id, input_name))?
            .clone();
        let was_connected = input.is_connected();
        input.set_source(None)?;

        self.links
            .retain(|l| !(l.to == to_id && l.input == input_name));
        if was_connected {
            tracing::info!("Removed link into {:?}.{}", to_id, input_name);
        }
        Ok(was_connected)
    }

    /// Start every item. Stops at the first failure to spawn.
    pub fn start_all(&self) -> PipelineResult<()> {
        for item in self.items() {
            item.start()?;
        }
        Ok(())
    }

    /// Stop every item, in reverse creation order.
    pub fn stop_all(&self) {
        for item in self.items.iter().rev().flatten() {
            item.stop();
        }
    }

    pub fn topology(&self) -> TopologySnapshot {
        let items = self
            .items()
            .map(|h| ItemSnapshot {
                id: h.id(),
                type_name: h.type_name().to_string(),
                state: h.state(),
                ports: h.port_descriptors(),
                params: h.param_descriptors(),
            })
            .collect();

        let links = self
            .links
            .iter()
            .filter_map(|l| {
                let from = self
                    .port_index(l.from, &l.output, false)
                    .and_then(|index| PortId::new(l.from, index));
                let to = self
                    .port_index(l.to, &l.input, true)
                    .and_then(|index| PortId::new(l.to, index));
                let (Some(from), Some(to)) = (from, to) else {
                    tracing::warn!(
                        "Link {:?}.{} -> {:?}.{} has no packable port id, left out of snapshot",
                        l.from,
                        l.output,
                        l.to,
                        l.input
                    );
                    return None;
                };
                Some(LinkSnapshot {
                    from,
                    to,
                    from_item: l.from,
                    output: l.output.clone(),
                    to_item: l.to,
                    input: l.input.clone(),
                })
            })
            .collect();

        TopologySnapshot { items, links }
    }

    /// Position of a port in the item's descriptor list (inputs first).
    fn port_index(&self, id: ItemId, name: &str, input: bool) -> Option<usize> {
        let handle = self.item(id).ok()?;
        if input {
            handle.inputs().iter().position(|p| p.name() == name)
        } else {
            let offset = handle.outputs().iter().position(|p| p.name() == name)?;
            Some(handle.inputs().len() + offset)
        }
    }
}

impl Drop for ItemGraph {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn unknown_port(item: ItemId, port: &str) -> PipelineError {
    PipelineError::UnknownPort {
        item,
        port: port.to_string(),
    }
}
