pub mod configuration;
pub mod group;
pub mod lock;
pub mod notification;
pub mod pagination;
pub mod patch;
pub mod prototype;
pub mod rotation;
pub mod secret;
pub mod ttl;
pub mod validation;
pub mod version;
