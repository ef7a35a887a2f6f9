//! Distribution drift of weather inputs (PSI)

pub mod monitor;
pub mod psi;

pub use monitor::{DriftConfig, DriftMonitor, DriftRun, DriftWindows};
pub use psi::{classify, compute_psi, PsiResult};
