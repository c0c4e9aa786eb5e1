pub mod cache;
pub mod cache_manager;
pub mod candidates;
pub mod config;
pub mod connector;
pub mod directory;
pub mod discovery;
pub mod prober;
pub mod upgrade;

#[cfg(test)]
mod testing;
