//! Contains types related to the [`EntitySet`] property collection.

use std::sync::Arc;

use bit_set::BitSet;
use parking_lot::RwLock;
use tracing::{debug, span, Level};

use super::{
    entity::{Allocator, Entity},
    storage::{
        layer::{CapacityError, PageGeometry},
        occupancy::OccupancyKind,
        property::{Property, PropertyTypeId},
        store::PropertyStore,
        Fetch, FetchMut, StoreCell, Stores,
    },
};

/// Error type representing a failure to access entity data.
#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EntityError {
    /// Attempted to read an entity which was never reserved, which has been cleared, or which
    /// was reissued and has not been written since.
    #[error("entity {0} is not defined")]
    Undefined(Entity),
    /// Attempted to address an entity beyond the set's capacity.
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

/// Describes configuration options for the creation of a new [`EntitySet`].
///
/// `layer_capacity * capacity_step` is the number of entity IDs each property store can
/// address. It is fixed for the lifetime of the set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EntitySetOptions {
    /// The number of pages in each property store.
    pub layer_capacity: usize,
    /// The number of entities in each page, and the granularity of allocation.
    pub capacity_step: usize,
    /// How each property store tracks which entities carry the property.
    pub occupancy: OccupancyKind,
}

impl Default for EntitySetOptions {
    fn default() -> Self {
        Self {
            layer_capacity: 2048,
            capacity_step: 512,
            occupancy: OccupancyKind::default(),
        }
    }
}

impl EntitySetOptions {
    fn geometry(&self) -> PageGeometry {
        PageGeometry::new(self.layer_capacity, self.capacity_step)
    }
}

/// A collection of entities and their properties.
///
/// Entities are plain numeric IDs issued by the set. Any number of property types may be
/// attached to each entity; each property type is kept in its own paged column store, which
/// is created the first time the type is used.
///
/// Reading and writing properties takes `&self`. Each property store is locked independently,
/// so threads working on different property types never wait on each other, and stores may be
/// created from several threads at once. Calls on the same property type are serialized.
/// Reserving and clearing entities takes `&mut self`, as the identity allocator has a single
/// writer.
#[derive(Debug)]
pub struct EntitySet {
    options: EntitySetOptions,
    geometry: PageGeometry,
    allocator: Allocator,
    unwritten: RwLock<BitSet>,
    stores: Stores,
}

impl Default for EntitySet {
    fn default() -> Self {
        Self::new(EntitySetOptions::default())
    }
}

impl EntitySet {
    /// Creates a new entity set with the given options.
    ///
    /// # Panics
    /// Panics if `layer_capacity` or `capacity_step` is zero.
    pub fn new(options: EntitySetOptions) -> Self {
        Self {
            geometry: options.geometry(),
            options,
            allocator: Allocator::new(),
            unwritten: RwLock::new(BitSet::new()),
            stores: Stores::default(),
        }
    }

    /// Creates a new entity set with the given page geometry and default occupancy tracking.
    pub fn with_capacity(layer_capacity: usize, capacity_step: usize) -> Self {
        Self::new(EntitySetOptions {
            layer_capacity,
            capacity_step,
            ..EntitySetOptions::default()
        })
    }

    /// Returns the options the set was created with.
    pub fn options(&self) -> &EntitySetOptions {
        &self.options
    }

    /// Returns the number of live entities.
    pub fn count(&self) -> u64 {
        self.allocator.len()
    }

    /// Returns the number of entity IDs each property store can address.
    pub fn capacity(&self) -> u64 {
        self.geometry.capacity()
    }

    /// Returns `true` if the entity has been reserved and not cleared since.
    pub fn contains(&self, entity: Entity) -> bool {
        self.allocator.is_live(entity)
    }

    /// Reserves an entity ID, reusing a cleared ID if one is available.
    ///
    /// A reused ID carries no properties, and reads of it fail with
    /// [`EntityError::Undefined`] until one of its properties is written. Previously written
    /// values may still be physically stored until they are overwritten.
    pub fn reserve(&mut self) -> Entity {
        let minted = self.allocator.high_water_mark();
        let entity = self.allocator.reserve();
        if entity.id() < minted {
            self.unwritten.get_mut().insert(entity.id() as usize);
        }
        entity
    }

    /// Reserves `count` entity IDs, reusing cleared IDs first.
    pub fn reserve_many(&mut self, count: usize) -> Vec<Entity> {
        let minted = self.allocator.high_water_mark();
        let entities = self.allocator.reserve_many(count);
        let unwritten = self.unwritten.get_mut();
        for entity in entities.iter().filter(|entity| entity.id() < minted) {
            unwritten.insert(entity.id() as usize);
        }
        entities
    }

    /// Returns the value of property `T` for an entity.
    ///
    /// Returns `T::default()` if the property was never written for the entity.
    ///
    /// # Errors
    /// [`EntityError::Undefined`] if the entity is not live, or was reissued and none of its
    /// properties have been written since, regardless of `T`.
    /// [`EntityError::Capacity`] if the entity is beyond the set's capacity.
    pub fn get<T: Property>(&self, entity: Entity) -> Result<T, EntityError> {
        if !self.allocator.is_live(entity) || self.unwritten.read().contains(entity.id() as usize)
        {
            return Err(EntityError::Undefined(entity));
        }

        match self.stores.get(PropertyTypeId::of::<T>()) {
            Some(cell) => Ok(Fetch::<T>::new(&cell).get(entity)?),
            None => {
                self.geometry.locate(entity)?;
                Ok(T::default())
            }
        }
    }

    /// Returns `true` if property `T` is present for the entity.
    pub fn has<T: Property>(&self, entity: Entity) -> bool {
        self.stores
            .get(PropertyTypeId::of::<T>())
            .map_or(false, |cell| cell.read().contains(entity))
    }

    /// Returns the number of entities for which property `T` is present.
    pub fn count_with<T: Property>(&self) -> usize {
        self.stores
            .get(PropertyTypeId::of::<T>())
            .map_or(0, |cell| cell.read().len())
    }

    /// Iterates through all entities for which property `T` is present, as of the call.
    ///
    /// The entities are collected before the store is unlocked, so the set may be freely
    /// modified while iterating. With [`OccupancyKind::Inline`] entities are yielded in
    /// ascending order; with [`OccupancyKind::Indexed`] they are yielded in the order they
    /// first became present, perturbed by removals.
    pub fn query_entities_with<T: Property>(&self) -> impl Iterator<Item = Entity> {
        self.stores
            .get(PropertyTypeId::of::<T>())
            .map(|cell| cell.read().present().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
    }

    /// Applies `f` to property `T` of an entity and marks it present.
    pub fn mutate<T, F>(&self, entity: Entity, f: F) -> Result<(), CapacityError>
    where
        T: Property,
        F: FnOnce(Entity, &mut T),
    {
        let cell = self.store_cell::<T>();
        FetchMut::<T>::new(&cell).update(entity, f)?;
        self.written(std::slice::from_ref(&entity));
        Ok(())
    }

    /// Marks property `T` present for an entity without changing its value.
    ///
    /// Useful for marker properties which carry no data.
    pub fn touch<T: Property>(&self, entity: Entity) -> Result<(), CapacityError> {
        let cell = self.store_cell::<T>();
        FetchMut::<T>::new(&cell).touch(entity)?;
        self.written(std::slice::from_ref(&entity));
        Ok(())
    }

    /// Applies `f` to property `T` of each entity, in the given order, and marks each present.
    ///
    /// Fails without modifying any entity if one of them is beyond the set's capacity.
    pub fn mutate_many<T, F>(&self, entities: &[Entity], f: F) -> Result<(), CapacityError>
    where
        T: Property,
        F: FnMut(Entity, &mut T),
    {
        let cell = self.store_cell::<T>();
        FetchMut::<T>::new(&cell).update_many(entities, f)?;
        self.written(entities);
        Ok(())
    }

    /// Marks property `T` present for each entity without changing its value.
    pub fn touch_many<T: Property>(&self, entities: &[Entity]) -> Result<(), CapacityError> {
        self.mutate_many::<T, _>(entities, |_, _| {})
    }

    /// Applies `f` to property `T` of each given entity for which `T` is already present, in
    /// the given order. Other entities are skipped. Returns the number of entities visited.
    pub fn mutate_set<T, F>(&self, entities: &[Entity], f: F) -> usize
    where
        T: Property,
        F: FnMut(Entity, &mut T),
    {
        let cell = self.store_cell::<T>();
        let visited = FetchMut::<T>::new(&cell).update_set(entities, f);
        visited
    }

    /// Applies `f` to property `T` of every entity for which it is present, in ascending
    /// entity order. Returns the number of entities visited.
    pub fn mutate_all_set<T, F>(&self, f: F) -> usize
    where
        T: Property,
        F: FnMut(Entity, &mut T),
    {
        match self.stores.get(PropertyTypeId::of::<T>()) {
            Some(cell) => {
                let visited = FetchMut::<T>::new(&cell).update_all_set(f);
                visited
            }
            None => 0,
        }
    }

    /// Applies `f` to property `T` of every entity which has both `W` and `T` present, in
    /// ascending entity order. Entities with `W` but without `T` are left untouched. Returns
    /// the number of entities visited.
    pub fn mutate_all_set_with<T, W, F>(&self, f: F) -> usize
    where
        T: Property,
        W: Property,
        F: FnMut(Entity, &mut T),
    {
        let with = self.present_sorted::<W>();
        self.mutate_set::<T, F>(&with, f)
    }

    /// Clears an entity: releases its ID for reuse and marks every property absent for it.
    ///
    /// Stored values are left in place.
    pub fn clear(&mut self, entity: Entity) {
        self.allocator.release(entity);
        for cell in self.stores.cells() {
            cell.write().clear(entity);
        }
    }

    /// Clears a collection of entities.
    pub fn clear_many(&mut self, entities: &[Entity]) {
        let span = span!(Level::TRACE, "clear_many", entities = entities.len());
        let _guard = span.enter();
        self.allocator.release_many(entities.iter().copied());
        for cell in self.stores.cells() {
            cell.write().clear_many(entities);
        }
    }

    /// Marks property `T` absent for an entity. The entity and its other properties are left
    /// untouched. Returns `true` if the property was present.
    pub fn clear_property<T: Property>(&self, entity: Entity) -> bool {
        self.stores
            .get(PropertyTypeId::of::<T>())
            .map_or(false, |cell| cell.write().clear(entity))
    }

    fn written(&self, entities: &[Entity]) {
        if self.unwritten.read().is_empty() {
            return;
        }

        let mut unwritten = self.unwritten.write();
        for entity in entities {
            unwritten.remove(entity.id() as usize);
        }
    }

    fn present_sorted<T: Property>(&self) -> Vec<Entity> {
        self.stores
            .get(PropertyTypeId::of::<T>())
            .map(|cell| Fetch::<T>::new(&cell).present_sorted())
            .unwrap_or_default()
    }

    fn store_cell<T: Property>(&self) -> Arc<StoreCell> {
        let geometry = self.geometry;
        let occupancy = self.options.occupancy;
        self.stores.get_or_insert_with(|| {
            let property = PropertyTypeId::of::<T>();
            debug!(
                %property,
                pages = geometry.layer_capacity(),
                slots = geometry.capacity_step(),
                ?occupancy,
                "creating property store"
            );
            PropertyStore::<T>::new(geometry, occupancy)
        })
    }
}

#[cfg(feature = "parallel")]
impl EntitySet {
    /// Applies `f` in parallel to property `T` of each entity and marks each present.
    ///
    /// Entities are partitioned by page across worker threads and no ordering is
    /// guaranteed. `f` must only modify the value it is given. Fails without modifying any
    /// entity if one of them is beyond the set's capacity.
    pub fn par_mutate_many<T, F>(&self, entities: &[Entity], f: F) -> Result<(), CapacityError>
    where
        T: Property,
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let cell = self.store_cell::<T>();
        FetchMut::<T>::new(&cell).par_update_many(entities, f)?;
        self.written(entities);
        Ok(())
    }

    /// Applies `f` in parallel to property `T` of each given entity for which `T` is already
    /// present. No ordering is guaranteed.
    pub fn par_mutate_set<T, F>(&self, entities: &[Entity], f: F)
    where
        T: Property,
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let cell = self.store_cell::<T>();
        FetchMut::<T>::new(&cell).par_update_set(entities, f);
    }

    /// Applies `f` in parallel to property `T` of every entity for which it is present.
    /// No ordering is guaranteed.
    pub fn par_mutate_all_set<T, F>(&self, f: F)
    where
        T: Property,
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        if let Some(cell) = self.stores.get(PropertyTypeId::of::<T>()) {
            FetchMut::<T>::new(&cell).par_update_all_set(f);
        }
    }

    /// Applies `f` in parallel to property `T` of every entity which has both `W` and `T`
    /// present. No ordering is guaranteed.
    pub fn par_mutate_all_set_with<T, W, F>(&self, f: F)
    where
        T: Property,
        W: Property,
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let with: Vec<Entity> = self.query_entities_with::<W>().collect();
        self.par_mutate_set::<T, F>(&with, f)
    }

    /// Clears a collection of entities, clearing each property store on its own worker.
    ///
    /// IDs are released on the calling thread.
    pub fn par_clear_many(&mut self, entities: &[Entity]) {
        use rayon::prelude::*;

        let span = span!(Level::TRACE, "par_clear_many", entities = entities.len());
        let _guard = span.enter();
        self.allocator.release_many(entities.iter().copied());
        self.stores.cells().par_iter().for_each(|cell| {
            cell.write().clear_many(entities);
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Pos(f32, f32);
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Marker;

    #[test]
    fn create() {
        let set = EntitySet::default();
        assert_eq!(set.capacity(), 2048 * 512);
        assert_eq!(set.count(), 0);
        assert_eq!(set.options(), &EntitySetOptions::default());
    }

    #[test]
    #[should_panic(expected = "layer capacity must be non-zero")]
    fn zero_layer_capacity() {
        let _ = EntitySet::with_capacity(0, 10);
    }

    #[test]
    fn get_without_store_checks_capacity() {
        let mut set = EntitySet::with_capacity(1, 4);
        let entities = set.reserve_many(6);
        assert_eq!(set.get::<Pos>(entities[3]), Ok(Pos::default()));
        assert!(matches!(
            set.get::<Pos>(Entity::new(5)),
            Err(EntityError::Capacity(_))
        ));
    }

    #[test]
    fn stores_are_created_lazily() {
        let mut set = EntitySet::default();
        let entity = set.reserve();
        assert_eq!(set.stores.len(), 0);

        assert_eq!(set.get::<Pos>(entity), Ok(Pos::default()));
        assert!(!set.has::<Pos>(entity));
        assert_eq!(set.mutate_all_set::<Pos, _>(|_, _| {}), 0);
        assert_eq!(set.query_entities_with::<Pos>().count(), 0);
        assert_eq!(set.stores.len(), 0);

        set.mutate_all_set_with::<Pos, Marker, _>(|_, _| {});
        assert_eq!(set.stores.len(), 1);
    }

    #[test]
    fn reissued_entity_is_undefined_until_written() {
        let mut set = EntitySet::default();
        let entities = set.reserve_many(3);
        set.mutate::<Pos, _>(entities[1], |_, p| p.0 = 2.0).unwrap();
        set.clear(entities[1]);

        let reused = set.reserve();
        assert_eq!(reused, entities[1]);
        assert_eq!(set.get::<Pos>(reused), Err(EntityError::Undefined(reused)));
        assert_eq!(set.get::<Pos>(entities[0]), Ok(Pos::default()));

        set.touch::<Marker>(reused).unwrap();
        assert_eq!(set.get::<Pos>(reused), Ok(Pos(2.0, 0.0)));
        assert!(!set.has::<Pos>(reused));
    }

    #[test]
    fn failed_write_leaves_reissued_entity_undefined() {
        let mut set = EntitySet::with_capacity(1, 4);
        let entity = set.reserve();
        set.clear(entity);
        let entity = set.reserve();

        let entities = [entity, Entity::new(9)];
        assert!(set.touch_many::<Marker>(&entities).is_err());
        assert!(set.get::<Marker>(entity).is_err());
    }

    #[test]
    fn clear_property_leaves_entity() {
        let mut set = EntitySet::default();
        let entity = set.reserve();
        set.touch::<Marker>(entity).unwrap();
        set.mutate::<Pos, _>(entity, |_, p| p.0 = 1.0).unwrap();

        assert!(set.clear_property::<Marker>(entity));
        assert!(!set.clear_property::<Marker>(entity));
        assert!(set.contains(entity));
        assert!(set.has::<Pos>(entity));
        assert!(!set.has::<Marker>(entity));
    }

    #[test]
    fn intersection_with_itself() {
        let mut set = EntitySet::default();
        let entities = set.reserve_many(3);
        set.touch_many::<Marker>(&entities[1..]).unwrap();
        set.mutate_many::<Pos, _>(&entities[1..], |e, p| p.0 = e.id() as f32).unwrap();

        assert_eq!(set.mutate_all_set_with::<Pos, Pos, _>(|_, p| p.1 = 1.0), 2);
        assert_eq!(set.get::<Pos>(entities[2]), Ok(Pos(2.0, 1.0)));
    }

    #[test]
    fn threads_write_different_properties() {
        let mut set = EntitySet::default();
        let entities = set.reserve_many(100);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for &entity in &entities {
                    set.mutate::<Pos, _>(entity, |e, p| p.0 = e.id() as f32).unwrap();
                }
            });
            scope.spawn(|| {
                for &entity in entities.iter().step_by(2) {
                    set.touch::<Marker>(entity).unwrap();
                }
            });
        });

        assert_eq!(set.stores.len(), 2);
        assert_eq!(set.count_with::<Pos>(), 100);
        assert_eq!(set.count_with::<Marker>(), 50);
        assert_eq!(set.get::<Pos>(entities[99]), Ok(Pos(99.0, 0.0)));
    }
}
