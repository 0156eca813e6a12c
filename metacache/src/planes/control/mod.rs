pub mod sweeper;
pub mod write_behind;

pub use sweeper::{RetentionPolicy, spawn_sweeper, sweep_once};
pub use write_behind::{WriteBehind, WriteBehindConfig};
