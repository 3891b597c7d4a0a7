pub mod actions;
pub mod events;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod rooms;
