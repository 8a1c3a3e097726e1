//! Item types available for creation by name.
//!
//! The host (an editor palette, a saved graph) refers to item types by their
//! [`ItemType::TYPE_NAME`]; the registry maps that name back to a constructor.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::item::{build_boxed, ItemFactory, ItemType};
use crate::pipeline::nodes::{BrightSpotsItem, GaussianBlurItem, TestPatternSource};
use serde::Serialize;

/// Registered item type.
#[derive(Clone, Copy)]
pub struct ItemTypeInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub factory: ItemFactory,
}

impl std::fmt::Debug for ItemTypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemTypeInfo")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Serializable listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemTypeListing {
    pub name: &'static str,
    pub description: &'static str,
}

/// Name → constructor table, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    types: Vec<ItemTypeInfo>,
}

impl ItemRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in item type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<TestPatternSource>();
        registry.register::<GaussianBlurItem>();
        registry.register::<BrightSpotsItem>();
        registry
    }

    /// Add `I`. Re-registering a name replaces the earlier constructor.
    pub fn register<I: ItemType>(&mut self) {
        let info = ItemTypeInfo {
            name: I::TYPE_NAME,
            description: I::DESCRIPTION,
            factory: build_boxed::<I>,
        };
        match self.types.iter_mut().find(|t| t.name == I::TYPE_NAME) {
            Some(existing) => {
                tracing::warn!(type_name = I::TYPE_NAME, "item type registered twice");
                *existing = info;
            }
            None => self.types.push(info),
        }
    }

    pub fn get(&self, name: &str) -> PipelineResult<&ItemTypeInfo> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| PipelineError::UnknownItemType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.iter().any(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.iter().map(|t| t.name)
    }

    pub fn listing(&self) -> Vec<ItemTypeListing> {
        self.types
            .iter()
            .map(|t| ItemTypeListing {
                name: t.name,
                description: t.description,
            })
            .collect()
    }
}
