pub mod dual_source;
pub mod queue;
pub mod session;
pub mod transition;
