//! Tracks which entities currently carry a property.
//!
//! Presence is independent of slot allocation: a slot may be allocated and hold a value
//! while its entity is absent. Two strategies are provided:
//!
//! * [`SlotFlags`] keeps one flag per slot in a page table of its own, with the same geometry
//!   as the value layer, so an entity's flag lives at the same `(page, slot)` as its value.
//!   Lookups are a single index; iteration scans every allocated flag page and yields
//!   entities in ascending order.
//! * [`SparseIndex`] keeps a separate sparse set of present entities. Iteration is
//!   proportional to the number of present entities and yields them in insertion order,
//!   perturbed by removals.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::BuildHasherDefault,
};

use derivative::Derivative;

use crate::internals::{entity::Entity, hash::U64Hasher, storage::layer::PageGeometry};

/// A hasher optimized for entity IDs.
pub type EntityHasher = BuildHasherDefault<U64Hasher>;

/// Selects the occupancy tracking strategy used by property stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OccupancyKind {
    /// A side index of present entities. See [`SparseIndex`].
    Indexed,
    /// A flag per slot, kept in a page table parallel to the values rather than inside each
    /// value slot. See [`SlotFlags`].
    Inline,
}

impl Default for OccupancyKind {
    fn default() -> Self {
        OccupancyKind::Indexed
    }
}

impl OccupancyKind {
    /// Constructs an empty occupancy index of this kind.
    pub fn create(self, geometry: PageGeometry) -> Box<dyn Occupancy> {
        match self {
            OccupancyKind::Indexed => Box::new(SparseIndex::default()),
            OccupancyKind::Inline => Box::new(SlotFlags::new(geometry)),
        }
    }
}

/// A set of entities which are present for a single property type.
pub trait Occupancy: Debug + Send + Sync {
    /// Returns the strategy implemented by this index.
    fn kind(&self) -> OccupancyKind;

    /// Marks an entity present. Returns `true` if it was previously absent.
    fn insert(&mut self, entity: Entity) -> bool;

    /// Marks an entity absent. Returns `true` if it was previously present.
    fn remove(&mut self, entity: Entity) -> bool;

    /// Returns `true` if the entity is present.
    fn contains(&self, entity: Entity) -> bool;

    /// Returns the number of present entities.
    fn len(&self) -> usize;

    /// Iterates through all present entities.
    fn iter(&self) -> Box<dyn Iterator<Item = Entity> + '_>;

    /// Returns `true` if no entities are present.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks an entity present or absent.
    fn mark(&mut self, entity: Entity, present: bool) -> bool {
        if present {
            self.insert(entity)
        } else {
            self.remove(entity)
        }
    }

    /// Marks each entity present. Returns the number of entities which were previously absent.
    fn insert_many(&mut self, entities: &[Entity]) -> usize {
        entities.iter().filter(|&&entity| self.insert(entity)).count()
    }

    /// Marks each entity absent. Returns the number of entities which were previously present.
    fn remove_many(&mut self, entities: &[Entity]) -> usize {
        entities.iter().filter(|&&entity| self.remove(entity)).count()
    }
}

/// Per-slot presence flags, kept in a separate page table with the same geometry as the
/// value layer. Flag pages are allocated on first insertion, independently of value pages.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SlotFlags {
    geometry: PageGeometry,
    #[derivative(Debug = "ignore")]
    pages: Vec<Option<Box<[bool]>>>,
    len: usize,
}

impl SlotFlags {
    /// Constructs an empty set of flags for the given page geometry.
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            pages: (0..geometry.layer_capacity()).map(|_| None).collect(),
            len: 0,
        }
    }

    fn flag(&self, entity: Entity) -> Option<bool> {
        let (page, slot) = self.geometry.locate(entity).ok()?;
        self.pages[page].as_ref().map(|flags| flags[slot])
    }
}

impl Occupancy for SlotFlags {
    fn kind(&self) -> OccupancyKind {
        OccupancyKind::Inline
    }

    fn insert(&mut self, entity: Entity) -> bool {
        let (page, slot) = match self.geometry.locate(entity) {
            Ok(address) => address,
            Err(_) => return false,
        };

        let step = self.geometry.capacity_step();
        let flags = self.pages[page].get_or_insert_with(|| vec![false; step].into_boxed_slice());
        let inserted = !std::mem::replace(&mut flags[slot], true);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    fn remove(&mut self, entity: Entity) -> bool {
        let (page, slot) = match self.geometry.locate(entity) {
            Ok(address) => address,
            Err(_) => return false,
        };

        let removed = match self.pages[page].as_mut() {
            Some(flags) => std::mem::replace(&mut flags[slot], false),
            None => false,
        };
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn contains(&self, entity: Entity) -> bool {
        self.flag(entity).unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Entity> + '_> {
        let geometry = self.geometry;
        Box::new(
            self.pages
                .iter()
                .enumerate()
                .filter_map(|(page, flags)| flags.as_ref().map(|flags| (page, flags)))
                .flat_map(move |(page, flags)| {
                    flags
                        .iter()
                        .enumerate()
                        .filter(|(_, present)| **present)
                        .map(move |(slot, _)| geometry.entity(page, slot))
                }),
        )
    }
}

/// A sparse set of present entities.
#[derive(Debug, Default)]
pub struct SparseIndex {
    dense: Vec<Entity>,
    sparse: HashMap<Entity, usize, EntityHasher>,
}

impl Occupancy for SparseIndex {
    fn kind(&self) -> OccupancyKind {
        OccupancyKind::Indexed
    }

    fn insert(&mut self, entity: Entity) -> bool {
        if self.sparse.contains_key(&entity) {
            return false;
        }

        self.sparse.insert(entity, self.dense.len());
        self.dense.push(entity);
        true
    }

    fn remove(&mut self, entity: Entity) -> bool {
        let index = match self.sparse.remove(&entity) {
            Some(index) => index,
            None => return false,
        };

        self.dense.swap_remove(index);
        if let Some(&moved) = self.dense.get(index) {
            self.sparse.insert(moved, index);
        }
        true
    }

    fn contains(&self, entity: Entity) -> bool {
        self.sparse.contains_key(&entity)
    }

    fn len(&self) -> usize {
        self.dense.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Entity> + '_> {
        Box::new(self.dense.iter().copied())
    }
}
