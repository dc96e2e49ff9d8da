//! A column store for one property type, paired with its occupancy index.

use derivative::Derivative;
use itertools::Itertools;
use tracing::{span, Level};

use super::{
    layer::{CapacityError, Layer, PageGeometry},
    occupancy::{Occupancy, OccupancyKind},
    property::{Property, PropertyTypeId},
    UnknownPropertyStore,
};
use crate::internals::entity::Entity;

/// Stores the values of one property type for all entities, along with the set of entities
/// for which the property is present.
///
/// Writes through [`update`](Self::update) and its bulk forms mark entities present. The
/// `*_set` forms only visit entities which are already present, and never allocate.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct PropertyStore<T: Property> {
    type_id: PropertyTypeId,
    layer: Layer<T>,
    occupancy: Box<dyn Occupancy>,
}

impl<T: Property> PropertyStore<T> {
    /// Constructs an empty store.
    pub fn new(geometry: PageGeometry, occupancy: OccupancyKind) -> Self {
        Self {
            type_id: PropertyTypeId::of::<T>(),
            layer: Layer::new(geometry),
            occupancy: occupancy.create(geometry),
        }
    }

    /// Returns the underlying value layer.
    pub fn layer(&self) -> &Layer<T> {
        &self.layer
    }

    /// Returns the occupancy index.
    pub fn occupancy(&self) -> &dyn Occupancy {
        self.occupancy.as_ref()
    }

    /// Returns the number of entities for which the property is present.
    pub fn len(&self) -> usize {
        self.occupancy.len()
    }

    /// Returns `true` if the property is not present for any entity.
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    /// Returns `true` if the property is present for the entity.
    pub fn contains(&self, entity: Entity) -> bool {
        self.occupancy.contains(entity)
    }

    /// Iterates through all entities for which the property is present.
    pub fn present(&self) -> impl Iterator<Item = Entity> + '_ {
        self.occupancy.iter()
    }

    /// Returns a snapshot of the present entities in ascending order.
    pub fn present_sorted(&self) -> Vec<Entity> {
        match self.occupancy.kind() {
            OccupancyKind::Inline => self.occupancy.iter().collect(),
            OccupancyKind::Indexed => self.occupancy.iter().sorted().collect(),
        }
    }

    /// Returns the stored value for an entity. Slots which were never written read as the
    /// default value, regardless of presence.
    pub fn get(&self, entity: Entity) -> Result<T, CapacityError> {
        Ok(self.layer.get(entity)?.cloned().unwrap_or_default())
    }

    /// Applies `f` to the entity's value and marks it present.
    pub fn update<F>(&mut self, entity: Entity, f: F) -> Result<(), CapacityError>
    where
        F: FnOnce(Entity, &mut T),
    {
        self.layer.update(entity, f)?;
        self.occupancy.insert(entity);
        Ok(())
    }

    /// Marks the entity present without changing its value.
    pub fn touch(&mut self, entity: Entity) -> Result<(), CapacityError> {
        self.layer.slot_mut(entity)?;
        self.occupancy.insert(entity);
        Ok(())
    }

    /// Applies `f` to the entity's value if the property is present.
    /// Returns `true` if the entity was visited.
    pub fn update_if_set<F>(&mut self, entity: Entity, f: F) -> bool
    where
        F: FnOnce(Entity, &mut T),
    {
        if !self.occupancy.contains(entity) {
            return false;
        }

        match self.layer.get_mut(entity) {
            Ok(Some(value)) => {
                f(entity, value);
                true
            }
            _ => false,
        }
    }

    /// Applies `f` to each entity's value in order and marks them all present.
    ///
    /// Fails without modifying the store if any entity is out of range.
    pub fn update_many<F>(&mut self, entities: &[Entity], f: F) -> Result<(), CapacityError>
    where
        F: FnMut(Entity, &mut T),
    {
        let property = self.type_id;
        let span = span!(Level::TRACE, "update_many", %property, entities = entities.len());
        let _guard = span.enter();
        self.layer.update_each(entities, f)?;
        self.occupancy.insert_many(entities);
        Ok(())
    }

    /// Applies `f` in order to each given entity for which the property is present.
    /// Returns the number of entities visited.
    pub fn update_set<F>(&mut self, entities: &[Entity], f: F) -> usize
    where
        F: FnMut(Entity, &mut T),
    {
        let property = self.type_id;
        let span = span!(Level::TRACE, "update_set", %property, entities = entities.len());
        let _guard = span.enter();
        let present = self.filter_present(entities);
        self.layer.update_existing(&present, f)
    }

    /// Applies `f` to every entity for which the property is present, in ascending entity
    /// order. Returns the number of entities visited.
    pub fn update_all_set<F>(&mut self, f: F) -> usize
    where
        F: FnMut(Entity, &mut T),
    {
        let present = self.present_sorted();
        let property = self.type_id;
        let span = span!(Level::TRACE, "update_all_set", %property, entities = present.len());
        let _guard = span.enter();
        self.layer.update_existing(&present, f)
    }

    /// Marks the entity absent. Its stored value is left in place.
    pub fn remove(&mut self, entity: Entity) -> bool {
        self.occupancy.remove(entity)
    }

    fn filter_present(&self, entities: &[Entity]) -> Vec<Entity> {
        entities
            .iter()
            .copied()
            .filter(|&entity| self.occupancy.contains(entity))
            .collect()
    }
}

#[cfg(feature = "parallel")]
impl<T: Property> PropertyStore<T> {
    /// Applies `f` in parallel to each entity's value and marks them all present.
    ///
    /// Fails without modifying the store if any entity is out of range.
    pub fn par_update_many<F>(&mut self, entities: &[Entity], f: F) -> Result<(), CapacityError>
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let property = self.type_id;
        let span = span!(Level::TRACE, "par_update_many", %property, entities = entities.len());
        let _guard = span.enter();
        self.layer.par_update_each(entities, f)?;
        self.occupancy.insert_many(entities);
        Ok(())
    }

    /// Applies `f` in parallel to each given entity for which the property is present.
    pub fn par_update_set<F>(&mut self, entities: &[Entity], f: F)
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let property = self.type_id;
        let span = span!(Level::TRACE, "par_update_set", %property, entities = entities.len());
        let _guard = span.enter();
        let present = self.filter_present(entities);
        self.layer.par_update_existing(&present, f);
    }

    /// Applies `f` in parallel to every entity for which the property is present.
    pub fn par_update_all_set<F>(&mut self, f: F)
    where
        F: Fn(Entity, &mut T) + Send + Sync,
    {
        let present: Vec<Entity> = self.occupancy.iter().collect();
        let property = self.type_id;
        let span = span!(Level::TRACE, "par_update_all_set", %property, entities = present.len());
        let _guard = span.enter();
        self.layer.par_update_existing(&present, f);
    }
}

impl<T: Property> UnknownPropertyStore for PropertyStore<T> {
    fn property_type(&self) -> PropertyTypeId {
        self.type_id
    }

    fn contains(&self, entity: Entity) -> bool {
        self.occupancy.contains(entity)
    }

    fn len(&self) -> usize {
        self.occupancy.len()
    }

    fn present(&self) -> Box<dyn Iterator<Item = Entity> + '_> {
        self.occupancy.iter()
    }

    fn clear(&mut self, entity: Entity) -> bool {
        self.occupancy.remove(entity)
    }

    fn clear_many(&mut self, entities: &[Entity]) -> usize {
        self.occupancy.remove_many(entities)
    }
}
