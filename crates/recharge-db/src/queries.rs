//! Query functions organized by collection.

pub mod draws;
pub mod outbox;
pub mod subscribers;
pub mod topups;
