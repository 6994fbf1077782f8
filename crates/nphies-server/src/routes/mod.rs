pub mod events;
pub mod poll;
