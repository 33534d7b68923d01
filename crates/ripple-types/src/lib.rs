pub mod wire;

pub use wire::{ClientFrame, Message};
