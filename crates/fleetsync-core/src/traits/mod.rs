//! Trait seams between the engine and its collaborators

pub mod cursor_store;
pub mod device_client;
pub mod repository;

pub use cursor_store::{CursorStore, CursorStoreFactory};
pub use device_client::{DeviceClient, DeviceClientFactory};
pub use repository::{
    NewIpPool, NewPppoeProfile, NewPppoeUser, Repository, RepositoryFactory, Upserted,
};
