pub mod control;
pub mod route;

#[cfg(test)]
mod tests;

pub use control::{MissionLoop, TickReport};
pub use route::{advance, Advance, Outcome};
