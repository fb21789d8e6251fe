pub mod calls;
pub mod registry;
pub mod rooms;
