//! Property storage: one paged column store per property type, held in a type-keyed registry.

use std::{
    collections::HashMap,
    hash::BuildHasherDefault,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use downcast_rs::{impl_downcast, Downcast};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internals::{entity::Entity, hash::PropertyTypeIdHasher};
use property::{Property, PropertyTypeId};
use store::PropertyStore;

pub mod layer;
pub mod occupancy;
pub mod property;
pub mod store;

/// A column store whose property type is not known statically.
pub trait UnknownPropertyStore: Downcast + Send + Sync {
    /// Returns the type of property held by this store.
    fn property_type(&self) -> PropertyTypeId;

    /// Returns `true` if the property is present for the entity.
    fn contains(&self, entity: Entity) -> bool;

    /// Returns the number of entities for which the property is present.
    fn len(&self) -> usize;

    /// Returns `true` if the property is not present for any entity.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates through all entities for which the property is present.
    fn present(&self) -> Box<dyn Iterator<Item = Entity> + '_>;

    /// Marks an entity absent. Returns `true` if it was present.
    fn clear(&mut self, entity: Entity) -> bool;

    /// Marks each entity absent. Returns the number of entities which were present.
    fn clear_many(&mut self, entities: &[Entity]) -> usize;
}
impl_downcast!(UnknownPropertyStore);

/// A lockable column store shared between the registry and its users.
pub type StoreCell = RwLock<Box<dyn UnknownPropertyStore>>;

#[cold]
#[inline(never)]
fn mismatched_store<T: Property>(found: PropertyTypeId) -> ! {
    panic!(
        "property store registered for {} holds {}",
        PropertyTypeId::of::<T>(),
        found
    )
}

/// Shared access to the store of property `T`. Holds the store's read lock.
pub struct Fetch<'a, T: Property> {
    inner: RwLockReadGuard<'a, Box<dyn UnknownPropertyStore>>,
    _marker: PhantomData<T>,
}

impl<'a, T: Property> Fetch<'a, T> {
    /// Locks a store for reading.
    ///
    /// # Panics
    /// Dereferencing panics if the store does not hold `T`.
    pub fn new(cell: &'a StoreCell) -> Self {
        Self {
            inner: cell.read(),
            _marker: PhantomData,
        }
    }
}

impl<'a, T: Property> Deref for Fetch<'a, T> {
    type Target = PropertyStore<T>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.inner.downcast_ref() {
            Some(store) => store,
            None => mismatched_store::<T>(self.inner.property_type()),
        }
    }
}

/// Exclusive access to the store of property `T`. Holds the store's write lock.
pub struct FetchMut<'a, T: Property> {
    inner: RwLockWriteGuard<'a, Box<dyn UnknownPropertyStore>>,
    _marker: PhantomData<T>,
}

impl<'a, T: Property> FetchMut<'a, T> {
    /// Locks a store for writing, blocking until no other thread holds it.
    ///
    /// # Panics
    /// Dereferencing panics if the store does not hold `T`.
    pub fn new(cell: &'a StoreCell) -> Self {
        Self {
            inner: cell.write(),
            _marker: PhantomData,
        }
    }
}

impl<'a, T: Property> Deref for FetchMut<'a, T> {
    type Target = PropertyStore<T>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.inner.downcast_ref() {
            Some(store) => store,
            None => mismatched_store::<T>(self.inner.property_type()),
        }
    }
}

impl<'a, T: Property> DerefMut for FetchMut<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        let found = self.inner.property_type();
        match self.inner.downcast_mut() {
            Some(store) => store,
            None => mismatched_store::<T>(found),
        }
    }
}

/// Contains the column stores for all property types in an entity set.
///
/// Each property type has at most one store, created on first use and never removed. Stores
/// may be looked up and created from several threads at once; when two threads race to create
/// the same store, the first insertion wins and both receive it.
#[derive(Default)]
pub struct Stores {
    storages: RwLock<
        HashMap<PropertyTypeId, Arc<StoreCell>, BuildHasherDefault<PropertyTypeIdHasher>>,
    >,
}

impl Stores {
    /// Returns the number of registered property types.
    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    /// Returns `true` if no property types have been registered.
    pub fn is_empty(&self) -> bool {
        self.storages.read().is_empty()
    }

    /// Returns `true` if a store exists for the given property type.
    pub fn contains(&self, type_id: PropertyTypeId) -> bool {
        self.storages.read().contains_key(&type_id)
    }

    /// Returns the store for the given property type.
    pub fn get(&self, type_id: PropertyTypeId) -> Option<Arc<StoreCell>> {
        self.storages.read().get(&type_id).cloned()
    }

    /// Gets or inserts the store for property type `T`.
    ///
    /// `create` is only called by the thread which inserts the store.
    pub fn get_or_insert_with<T, F>(&self, create: F) -> Arc<StoreCell>
    where
        T: Property,
        F: FnOnce() -> PropertyStore<T>,
    {
        let type_id = PropertyTypeId::of::<T>();
        if let Some(cell) = self.get(type_id) {
            return cell;
        }

        self.storages
            .write()
            .entry(type_id)
            .or_insert_with(|| {
                let store: Box<dyn UnknownPropertyStore> = Box::new(create());
                Arc::new(RwLock::new(store))
            })
            .clone()
    }

    /// Returns a snapshot of all registered stores.
    pub fn cells(&self) -> Vec<Arc<StoreCell>> {
        self.storages.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.storages.read().keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::{layer::PageGeometry, occupancy::OccupancyKind, *};
    use std::sync::Barrier;

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Strength(i32);
    #[derive(Default, Clone, Debug, PartialEq)]
    struct Health(i32);

    fn create<T: Property>() -> PropertyStore<T> {
        PropertyStore::new(PageGeometry::new(4, 4), OccupancyKind::Indexed)
    }

    #[test]
    fn create_once_per_type() {
        let stores = Stores::default();
        let cell = stores.get_or_insert_with(create::<Strength>);
        FetchMut::<Strength>::new(&cell)
            .update(Entity::new(1), |_, s| s.0 = 3)
            .unwrap();

        let again = stores.get_or_insert_with::<Strength, _>(|| panic!("store created twice"));
        assert!(Arc::ptr_eq(&cell, &again));
        assert_eq!(Fetch::<Strength>::new(&again).get(Entity::new(1)), Ok(Strength(3)));
        assert_eq!(stores.len(), 1);
    }

    #[test]
    fn typed_lookup() {
        let stores = Stores::default();
        assert!(stores.get(PropertyTypeId::of::<Health>()).is_none());

        let health = stores.get_or_insert_with(create::<Health>);
        FetchMut::<Health>::new(&health).touch(Entity::new(2)).unwrap();
        stores.get_or_insert_with(create::<Strength>);

        assert!(stores.contains(PropertyTypeId::of::<Health>()));
        let cell = stores.get(PropertyTypeId::of::<Health>()).unwrap();
        assert!(Fetch::<Health>::new(&cell).contains(Entity::new(2)));
        let cell = stores.get(PropertyTypeId::of::<Strength>()).unwrap();
        assert!(Fetch::<Strength>::new(&cell).is_empty());
        assert_eq!(stores.cells().len(), 2);
    }

    #[test]
    #[should_panic(expected = "property store registered for")]
    fn mismatched_fetch() {
        let stores = Stores::default();
        let cell = stores.get_or_insert_with(create::<Health>);
        let _ = Fetch::<Strength>::new(&cell).len();
    }

    #[test]
    fn clear_across_stores() {
        let stores = Stores::default();
        let health = stores.get_or_insert_with(create::<Health>);
        FetchMut::<Health>::new(&health).touch(Entity::new(2)).unwrap();
        let strength = stores.get_or_insert_with(create::<Strength>);
        FetchMut::<Strength>::new(&strength).touch(Entity::new(2)).unwrap();

        for cell in stores.cells() {
            assert!(cell.write().clear(Entity::new(2)));
        }

        assert!(stores.cells().iter().all(|cell| cell.read().is_empty()));
    }

    #[test]
    fn racing_creation_keeps_first_store() {
        let stores = Stores::default();
        let barrier = Barrier::new(4);

        let cells: Vec<Arc<StoreCell>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        stores.get_or_insert_with(create::<Health>)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(stores.len(), 1);
        assert!(cells.iter().all(|cell| Arc::ptr_eq(cell, &cells[0])));
    }
}
