pub mod listener;
pub mod registry;
