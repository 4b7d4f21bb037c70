pub mod content_type;
pub mod name_validator;
pub mod slot_store;
pub mod staging;
pub mod sweeper;
