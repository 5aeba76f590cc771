pub mod device;
pub mod events;
