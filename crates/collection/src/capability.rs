use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::EntityRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    Actions,
    BookmarkThis,
}

/// A user-triggerable operation. The id is opaque to the collection and
/// interpreted by whoever registered the action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Capability {
    Actions(Vec<Action>),
    BookmarkThis(Bookmark),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Actions(_) => CapabilityKind::Actions,
            Capability::BookmarkThis(_) => CapabilityKind::BookmarkThis,
        }
    }
}

/// Optional secondary interfaces of the entities of one collection.
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    entries: HashMap<(EntityRef, CapabilityKind), Capability>,
}

impl CapabilityRegistry {
    pub fn set(&mut self, entity: EntityRef, capability: Capability) {
        self.entries.insert((entity, capability.kind()), capability);
    }

    pub fn get(&self, entity: EntityRef, kind: CapabilityKind) -> Option<&Capability> {
        self.entries.get(&(entity, kind))
    }

    pub fn has(&self, entity: EntityRef, kind: CapabilityKind) -> bool {
        self.entries.contains_key(&(entity, kind))
    }

    pub fn remove(&mut self, entity: EntityRef, kind: CapabilityKind) -> Option<Capability> {
        self.entries.remove(&(entity, kind))
    }

    pub fn forget(&mut self, entity: EntityRef) {
        self.entries.retain(|(owner, _), _| *owner != entity);
    }

    /// Keeps only the capabilities whose owner passes `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(EntityRef) -> bool) {
        self.entries.retain(|(owner, _), _| keep(*owner));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
