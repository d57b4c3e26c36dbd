//! Domain Services - Pure logic that doesn't belong to a single entity

pub mod outbox_key;
pub mod page_cursor;
