pub mod jitter;
pub mod time;
