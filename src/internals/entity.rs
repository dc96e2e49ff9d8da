use std::fmt::{Display, Formatter};

use bit_set::BitSet;
use tracing::trace;

/// An opaque identifier for an entity.
///
/// Entities carry no data of their own; properties are attached to them through an
/// [`EntitySet`](crate::EntitySet).
#[derive(Debug, Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Constructs an entity handle from a raw ID.
    pub const fn new(id: u64) -> Self {
        Entity(id)
    }

    /// Returns the raw ID of the entity.
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl From<u64> for Entity {
    fn from(id: u64) -> Self {
        Entity(id)
    }
}

impl From<Entity> for u64 {
    fn from(entity: Entity) -> Self {
        entity.0
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues entity IDs.
///
/// New IDs are minted in increasing order from zero. Released IDs are recycled before any new
/// ID is minted, most recently released first.
///
/// The allocator is a single-writer structure; callers allocating from several threads must
/// serialize access themselves.
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    next: u64,
    released: Vec<Entity>,
    released_set: BitSet,
}

impl Allocator {
    /// Constructs a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entities.
    pub fn len(&self) -> u64 {
        self.next - self.released.len() as u64
    }

    /// Returns `true` if no entities are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the next ID that would be minted if no released IDs were available.
    pub fn high_water_mark(&self) -> u64 {
        self.next
    }

    /// Returns the number of released IDs waiting to be reissued.
    pub fn released_len(&self) -> usize {
        self.released.len()
    }

    /// Returns `true` if the entity has been issued and not released since.
    pub fn is_live(&self, entity: Entity) -> bool {
        entity.0 < self.next && !self.released_set.contains(entity.0 as usize)
    }

    /// Reserves a single entity ID.
    pub fn reserve(&mut self) -> Entity {
        if let Some(entity) = self.pop_released() {
            return entity;
        }

        let entity = Entity(self.next);
        self.next += 1;
        entity
    }

    /// Reserves `count` entity IDs.
    ///
    /// Released IDs are drained first; the remainder is minted as one contiguous run. No
    /// ordering is guaranteed across the returned IDs.
    pub fn reserve_many(&mut self, count: usize) -> Vec<Entity> {
        let mut reserved = Vec::with_capacity(count);
        while reserved.len() < count {
            match self.pop_released() {
                Some(entity) => reserved.push(entity),
                None => break,
            }
        }

        let remaining = (count - reserved.len()) as u64;
        reserved.extend((self.next..self.next + remaining).map(Entity));
        self.next += remaining;
        reserved
    }

    /// Releases an entity ID so that it may be reissued.
    ///
    /// Returns `true` if the ID was live. Releasing an ID twice, or releasing an ID which was
    /// never issued, does nothing.
    pub fn release(&mut self, entity: Entity) -> bool {
        if entity.0 >= self.next {
            trace!(%entity, "ignoring release of an entity which was never issued");
            return false;
        }

        if !self.released_set.insert(entity.0 as usize) {
            return false;
        }

        self.released.push(entity);
        true
    }

    /// Releases a collection of entity IDs. Returns the number of IDs which were live.
    pub fn release_many<I>(&mut self, entities: I) -> usize
    where
        I: IntoIterator<Item = Entity>,
    {
        entities
            .into_iter()
            .filter(|&entity| self.release(entity))
            .count()
    }

    fn pop_released(&mut self) -> Option<Entity> {
        let entity = self.released.pop()?;
        self.released_set.remove(entity.0 as usize);
        Some(entity)
    }
}
