pub mod events;
pub mod order;
pub mod position;
