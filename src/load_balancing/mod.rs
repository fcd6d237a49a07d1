//! Load balancing across the instances of a service.

pub mod ring;

pub use ring::Ring;
