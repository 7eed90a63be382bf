pub mod client;
pub mod naming;
pub mod rest;

pub use client::{ParticipantId, PersistenceClient, StoreError};
pub use naming::clip_path;
pub use rest::RestStore;
