//! Real-time layer: presence registry, socket relay, notification push and
//! the periodic reminder sweep.

pub mod delivery;
pub mod events;
pub mod notifier;
pub mod presence;
pub mod reminder;
pub mod socket;

#[cfg(test)]
mod tests;
