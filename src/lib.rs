// Library surface for the statistics engine, its store, and integration
// tests. The binary in main.rs only adds the CLI on top of this.
pub mod app_dirs;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod snapshot;
pub mod store;
pub mod util;
