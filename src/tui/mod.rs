//! Terminal UI (TUI) module for chatterm.

// === Submodules ===

pub mod app;
pub mod scrolling;
pub mod transcript;
pub mod ui;

// === Re-exports ===

pub use transcript::TuiSurface;
pub use ui::run_tui;
