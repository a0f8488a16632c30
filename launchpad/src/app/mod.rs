//! Application lifecycle

pub mod options;
pub mod recovery;
pub mod run;
pub mod state;
