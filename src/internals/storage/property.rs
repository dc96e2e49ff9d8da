//! Contains types related to entity properties.

use std::{
    any::TypeId,
    fmt::{Display, Formatter},
    hash::Hasher,
};

/// A unique ID for a property type.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, Ord)]
pub struct PropertyTypeId {
    pub(crate) type_id: TypeId,
    name: &'static str,
}

impl PropertyTypeId {
    /// Constructs the property type ID for the given property type.
    pub fn of<T: Property>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the internal TypeID of the property.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the name of the property type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::hash::Hash for PropertyTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialEq for PropertyTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id.eq(&other.type_id)
    }
}

impl Display for PropertyTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A marker trait for all types which can be attached to an entity as a property.
///
/// Properties are plain values: a slot which has never been written reads as the type's
/// [`Default`]. This trait has a blanket impl for all applicable types.
pub trait Property: 'static + Sized + Default + Clone + Send + Sync {}

impl<T: 'static + Sized + Default + Clone + Send + Sync> Property for T {}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default, Clone)]
    struct Health(i32);

    #[test]
    fn ids_compare_by_type() {
        assert_eq!(PropertyTypeId::of::<Health>(), PropertyTypeId::of::<Health>());
        assert_ne!(PropertyTypeId::of::<Health>(), PropertyTypeId::of::<i32>());
    }

    #[test]
    fn display_names_type() {
        let id = PropertyTypeId::of::<Health>();
        assert!(id.to_string().ends_with("Health"));
        assert_eq!(id.type_id(), TypeId::of::<Health>());
    }
}
