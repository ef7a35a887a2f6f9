pub mod drift;
pub mod farm;
pub mod settlement;
pub mod signal;

pub use drift::*;
pub use farm::*;
pub use settlement::*;
pub use signal::*;
