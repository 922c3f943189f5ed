pub mod retry;
pub mod transient;
