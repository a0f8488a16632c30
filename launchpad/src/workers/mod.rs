//! Background workers

pub mod queue;
