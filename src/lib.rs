//! Entity layers is a typed, paged, sparse property store for large numbers of numeric entities.
//!
//! Each property type is kept in its own column store ("layer"). A layer is a fixed page table
//! of lazily allocated, densely packed blocks of values, addressed directly by entity ID. A
//! separate occupancy index records which entities currently carry the property, so bulk
//! updates only visit entities which have it.
//!
//! # Getting Started
//!
//! ```rust
//! use entity_layers::prelude::*;
//!
//! // Define our property types
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Health(i32);
//!
//! // Create an entity set which can address 1000 * 1000 entities
//! let mut entities = EntitySet::with_capacity(1000, 1000);
//!
//! // Reserve some entities and attach properties to them
//! let player = entities.reserve();
//! entities.mutate::<Position, _>(player, |_, pos| pos.x = 10.0).unwrap();
//! entities.mutate::<Health, _>(player, |_, health| health.0 = 100).unwrap();
//!
//! let npc = entities.reserve();
//! entities.mutate::<Position, _>(npc, |_, pos| pos.y = 5.0).unwrap();
//!
//! assert!(entities.has::<Health>(player));
//! assert!(!entities.has::<Health>(npc));
//!
//! // Update every entity with a position
//! entities.mutate_all_set::<Position, _>(|_, pos| pos.x += 1.0);
//! assert_eq!(entities.get::<Position>(player).unwrap().x, 11.0);
//! ```
//!
//! # Features
//!
//! ### Marker properties and intersections
//!
//! Properties do not need to carry data. A marker can be attached with
//! [`touch`](EntitySet::touch) and used to select which entities a bulk update visits:
//!
//! ```rust
//! # use entity_layers::prelude::*;
//! # #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! # struct Health(i32);
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Npc;
//!
//! let mut entities = EntitySet::default();
//! let npc = entities.reserve();
//! entities.touch::<Npc>(npc).unwrap();
//! entities.mutate::<Health, _>(npc, |_, health| health.0 = 100).unwrap();
//!
//! // Heal every NPC which has health
//! entities.mutate_all_set_with::<Health, Npc, _>(|_, health| health.0 += 1);
//! assert_eq!(entities.get::<Health>(npc), Ok(Health(101)));
//! ```
//!
//! ### Clearing and reuse
//!
//! Clearing an entity releases its ID and marks all of its properties absent. The next
//! reservation reuses the ID:
//!
//! ```rust
//! # use entity_layers::prelude::*;
//! # #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! # struct Health(i32);
//! let mut entities = EntitySet::default();
//! let entity = entities.reserve();
//! entities.mutate::<Health, _>(entity, |_, health| health.0 = 100).unwrap();
//!
//! entities.clear(entity);
//! assert_eq!(entities.get::<Health>(entity), Err(EntityError::Undefined(entity)));
//!
//! assert_eq!(entities.reserve(), entity);
//! assert!(!entities.has::<Health>(entity));
//! ```
//!
//! ### Parallel updates
//!
//! With the `parallel` feature (enabled by default) every bulk update has a `par_` variant
//! which partitions the entities by page and updates each page on a rayon worker. The update
//! function must only modify the value it is handed.
//!
//! ```rust
//! # use entity_layers::prelude::*;
//! # #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! # struct Health(i32);
//! let mut entities = EntitySet::default();
//! let ids = entities.reserve_many(10_000);
//! entities.mutate_many::<Health, _>(&ids, |_, health| health.0 = 1).unwrap();
//!
//! # #[cfg(feature = "parallel")]
//! entities.par_mutate_all_set::<Health, _>(|_, health| health.0 *= 2);
//! # #[cfg(feature = "parallel")]
//! assert_eq!(entities.get::<Health>(ids[0]), Ok(Health(2)));
//! ```
//!
//! ### Concurrent access
//!
//! Reading and writing properties only needs a shared reference. Each property type has its
//! own lock, so threads working on different properties run side by side, and stores may be
//! created on first use from any thread:
//!
//! ```rust
//! # use entity_layers::prelude::*;
//! # #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! # struct Health(i32);
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Armor(i32);
//!
//! let mut entities = EntitySet::default();
//! let ids = entities.reserve_many(100);
//!
//! std::thread::scope(|scope| {
//!     scope.spawn(|| entities.mutate_many::<Health, _>(&ids, |_, h| h.0 = 100).unwrap());
//!     scope.spawn(|| entities.touch_many::<Armor>(&ids[..10]).unwrap());
//! });
//!
//! assert_eq!(entities.count_with::<Armor>(), 10);
//! ```
//!
//! Reserving and clearing entities requires exclusive access.
//!
//! ### Occupancy tracking
//!
//! Presence can be tracked either with a separate sparse index (the default) or with a flag
//! per slot. See [`OccupancyKind`] and [`EntitySetOptions`].

#![warn(missing_docs)]

mod internals;

/// Property storage.
pub mod storage {
    pub use crate::internals::storage::{
        layer::{CapacityError, Layer, PageGeometry},
        occupancy::{Occupancy, OccupancyKind, SlotFlags, SparseIndex},
        property::{Property, PropertyTypeId},
        store::PropertyStore,
        Fetch, FetchMut, StoreCell, Stores, UnknownPropertyStore,
    };
}

pub use crate::internals::{
    entity::{Allocator, Entity},
    entity_set::{EntityError, EntitySet, EntitySetOptions},
    storage::{
        layer::CapacityError,
        occupancy::OccupancyKind,
        property::{Property, PropertyTypeId},
    },
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        CapacityError, Entity, EntityError, EntitySet, EntitySetOptions, OccupancyKind,
        Property,
    };
}
