pub mod activity;
pub mod directory;
pub mod invoker;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod tracking;
