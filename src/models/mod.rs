pub mod assignment;
pub mod delivery;
pub mod drone;
pub mod event;
pub mod order;
