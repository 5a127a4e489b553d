pub mod backend;
pub mod config;
pub mod controller;
pub mod feed;
pub mod history;
pub mod service;
pub mod store;
pub mod stream;
pub mod ticker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
