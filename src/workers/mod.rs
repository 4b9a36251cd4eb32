pub mod expiry_listener;
pub mod sweeper;
