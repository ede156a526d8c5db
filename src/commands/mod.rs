// Resolve, render and persist
pub mod apply;

// Read-only state inspection
pub mod state;
