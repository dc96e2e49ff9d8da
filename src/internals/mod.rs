pub mod entity;
pub mod entity_set;
pub mod hash;
pub mod storage;
