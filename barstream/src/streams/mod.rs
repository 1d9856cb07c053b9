/// Idle read timeout wrapper used to detect silent upstream disconnections.
pub mod timeout;
