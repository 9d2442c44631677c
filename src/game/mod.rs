//! Game simulation modules

pub mod combat;
pub mod grid;
pub mod inbound;
pub mod physics;
pub mod round;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod tuning;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;

pub use runner::{GameHandle, GameLoop, Inbound};
pub use world::{MapRotation, World};
