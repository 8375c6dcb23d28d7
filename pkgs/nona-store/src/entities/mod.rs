//! Sea-ORM entities for nona-store

pub mod local_storage;

pub use local_storage::Entity as LocalStorage;
