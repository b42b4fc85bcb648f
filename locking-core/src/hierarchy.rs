//! Entity parent/child lookup used for ancestor (intention) locking

use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("cycle in parent chain of entity {entity_id} at {repeated}")]
    Cycle {
        entity_id: EntityId,
        repeated: EntityId,
    },
}

/// Yields the ancestor chain of an entity.
///
/// Order is nearest parent first, root last. The entity itself is not part
/// of its chain.
pub trait EntityHierarchy: Send + Sync {
    fn ancestors_of(&self, entity_id: EntityId) -> Result<Vec<EntityId>, HierarchyError>;
}

/// Child -> parent map. Entities without a parent are roots; entities not
/// mentioned at all are unknown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentMap {
    parents: HashMap<EntityId, EntityId>,
}

impl ParentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, child: EntityId, parent: EntityId) -> Self {
        self.insert(child, parent);
        self
    }

    pub fn insert(&mut self, child: EntityId, parent: EntityId) {
        self.parents.insert(child, parent);
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.parents.contains_key(&entity_id) || self.parents.values().any(|p| *p == entity_id)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

impl EntityHierarchy for ParentMap {
    fn ancestors_of(&self, entity_id: EntityId) -> Result<Vec<EntityId>, HierarchyError> {
        if !self.contains(entity_id) {
            return Err(HierarchyError::NotFound(entity_id));
        }

        let mut chain = Vec::new();
        let mut seen = HashSet::from([entity_id]);
        let mut current = entity_id;
        while let Some(&parent) = self.parents.get(&current) {
            if !seen.insert(parent) {
                return Err(HierarchyError::Cycle {
                    entity_id,
                    repeated: parent,
                });
            }
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }
}
