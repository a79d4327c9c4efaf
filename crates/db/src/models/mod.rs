//! Row models for the bus tables.

pub mod message;
