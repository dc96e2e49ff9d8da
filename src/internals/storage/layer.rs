//! A paged array store for one property type.
//!
//! A layer holds a fixed-size page table. Each page is a contiguous block of
//! `capacity_step` slots and is allocated the first time any entity addressed by it is
//! written. An entity's page is `id / capacity_step` and its slot within the page is
//! `id % capacity_step`. Pages which have never been allocated read as all-default values.
//!
//! The page table cannot grow; entities whose page index falls outside the table are rejected
//! with a [`CapacityError`]. Bounds are always checked before any page is allocated, so a
//! call which fails leaves the layer untouched.

use derivative::Derivative;
use thiserror::Error;
use tracing::trace;

use crate::internals::entity::Entity;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Error type representing an entity which lies outside of the pages a layer can address.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("entity {entity} is outside the addressable capacity of {capacity}")]
pub struct CapacityError {
    /// The entity which could not be addressed.
    pub entity: Entity,
    /// The number of entity IDs the layer can address.
    pub capacity: u64,
}

/// Describes how entity IDs map onto the pages of a layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageGeometry {
    layer_capacity: usize,
    capacity_step: usize,
}

impl PageGeometry {
    /// Constructs a page geometry of `layer_capacity` pages of `capacity_step` slots each.
    ///
    /// # Panics
    /// Panics if either dimension is zero.
    pub fn new(layer_capacity: usize, capacity_step: usize) -> Self {
        assert!(layer_capacity > 0, "layer capacity must be non-zero");
        assert!(capacity_step > 0, "capacity step must be non-zero");
        Self {
            layer_capacity,
            capacity_step,
        }
    }

    /// Returns the number of pages in the page table.
    pub fn layer_capacity(&self) -> usize {
        self.layer_capacity
    }

    /// Returns the number of slots in each page.
    pub fn capacity_step(&self) -> usize {
        self.capacity_step
    }

    /// Returns the number of entity IDs which can be addressed.
    pub fn capacity(&self) -> u64 {
        (self.layer_capacity as u64).saturating_mul(self.capacity_step as u64)
    }

    /// Returns the `(page, slot)` address of an entity.
    pub fn locate(&self, entity: Entity) -> Result<(usize, usize), CapacityError> {
        let step = self.capacity_step as u64;
        let page = entity.id() / step;
        if page >= self.layer_capacity as u64 {
            return Err(CapacityError {
                entity,
                capacity: self.capacity(),
            });
        }

        Ok((page as usize, (entity.id() % step) as usize))
    }

    /// Returns the entity stored at the given address.
    pub fn entity(&self, page: usize, slot: usize) -> Entity {
        Entity::new(page as u64 * self.capacity_step as u64 + slot as u64)
    }
}

/// A paged array of `T` values indexed by entity ID.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Layer<T> {
    geometry: PageGeometry,
    #[derivative(Debug = "ignore")]
    pages: Vec<Option<Box<[T]>>>,
    allocated: usize,
}

impl<T: Default> Layer<T> {
    /// Constructs an empty layer. No pages are allocated until they are written.
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            pages: (0..geometry.layer_capacity()).map(|_| None).collect(),
            allocated: 0,
        }
    }

    /// Returns the layer's page geometry.
    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Returns the number of pages which have been allocated.
    pub fn allocated_pages(&self) -> usize {
        self.allocated
    }

    /// Returns the value stored for an entity, or `None` if its page was never allocated.
    pub fn get(&self, entity: Entity) -> Result<Option<&T>, CapacityError> {
        let (page, slot) = self.geometry.locate(entity)?;
        Ok(self.pages[page].as_ref().map(|page| &page[slot]))
    }

    /// Returns the value stored for an entity, or `None` if its page was never allocated.
    /// Never allocates.
    pub fn get_mut(&mut self, entity: Entity) -> Result<Option<&mut T>, CapacityError> {
        let (page, slot) = self.geometry.locate(entity)?;
        Ok(self.pages[page].as_mut().map(|page| &mut page[slot]))
    }

    /// Returns the slot for an entity, allocating its page if needed.
    pub fn slot_mut(&mut self, entity: Entity) -> Result<&mut T, CapacityError> {
        let (page, slot) = self.geometry.locate(entity)?;
        Ok(&mut self.allocate(page)[slot])
    }

    /// Applies `f` to an entity's slot, allocating its page if needed.
    pub fn update<F>(&mut self, entity: Entity, f: F) -> Result<(), CapacityError>
    where
        F: FnOnce(Entity, &mut T),
    {
        let slot = self.slot_mut(entity)?;
        f(entity, slot);
        Ok(())
    }

    /// Applies `f` to the slot of each entity in order, allocating pages as needed.
    ///
    /// Every entity is bounds checked before any page is allocated or any slot is written.
    pub fn update_each<F>(&mut self, entities: &[Entity], mut f: F) -> Result<(), CapacityError>
    where
        F: FnMut(Entity, &mut T),
    {
        let located = entities
            .iter()
            .map(|&entity| self.geometry.locate(entity))
            .collect::<Result<Vec<_>, _>>()?;

        for (&entity, (page, slot)) in entities.iter().zip(located) {
            f(entity, &mut self.allocate(page)[slot]);
        }

        Ok(())
    }

    /// Applies `f` to the slot of each entity whose page is already allocated, in order.
    /// Entities which cannot be addressed, or whose page was never allocated, are skipped.
    ///
    /// Returns the number of slots visited.
    pub fn update_existing<F>(&mut self, entities: &[Entity], mut f: F) -> usize
    where
        F: FnMut(Entity, &mut T),
    {
        let mut visited = 0;
        for &entity in entities {
            if let Ok(Some(value)) = self.get_mut(entity) {
                f(entity, value);
                visited += 1;
            }
        }
        visited
    }

    fn allocate(&mut self, page: usize) -> &mut [T] {
        let step = self.geometry.capacity_step();
        let allocated = &mut self.allocated;
        self.pages[page].get_or_insert_with(|| {
            trace!(page, slots = step, "allocating layer page");
            *allocated += 1;
            std::iter::repeat_with(T::default).take(step).collect()
        })
    }
}

#[cfg(feature = "parallel")]
impl<T: Default + Send> Layer<T> {
    /// Applies `f` to the slot of each entity in parallel, allocating pages as needed.
    ///
    /// Entities are partitioned by page and each worker is handed exclusive access to the
    /// pages in its partition. No ordering is guaranteed. Every entity is bounds checked
    /// before any page is allocated or any slot is written.
    pub fn par_update_each<F>(&mut self, entities: &[Entity], f: F) -> Result<(), CapacityError>
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let mut buckets = self.empty_buckets();
        for &entity in entities {
            let (page, slot) = self.geometry.locate(entity)?;
            buckets[page].push(slot);
        }

        for (page, slots) in buckets.iter().enumerate() {
            if !slots.is_empty() {
                self.allocate(page);
            }
        }

        self.dispatch(buckets, f);
        Ok(())
    }

    /// Applies `f` in parallel to the slot of each entity whose page is already allocated.
    /// Entities which cannot be addressed, or whose page was never allocated, are skipped.
    pub fn par_update_existing<F>(&mut self, entities: &[Entity], f: F)
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let mut buckets = self.empty_buckets();
        for &entity in entities {
            if let Ok((page, slot)) = self.geometry.locate(entity) {
                if self.pages[page].is_some() {
                    buckets[page].push(slot);
                }
            }
        }

        self.dispatch(buckets, f);
    }

    fn empty_buckets(&self) -> Vec<Vec<usize>> {
        let mut buckets = Vec::new();
        buckets.resize_with(self.pages.len(), Vec::new);
        buckets
    }

    fn dispatch<F>(&mut self, buckets: Vec<Vec<usize>>, f: F)
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let geometry = self.geometry;
        self.pages
            .par_iter_mut()
            .zip(buckets.into_par_iter())
            .enumerate()
            .filter(|(_, (_, slots))| !slots.is_empty())
            .for_each(|(index, (page, slots))| {
                if let Some(page) = page.as_deref_mut() {
                    for slot in slots {
                        f(geometry.entity(index, slot), &mut page[slot]);
                    }
                }
            });
    }
}
