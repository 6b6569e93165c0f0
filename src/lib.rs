// Library exports for hoodpost
// This allows integration tests and external code to use hoodpost modules

pub mod auth;
pub mod blob;
pub mod composer;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod identity;
pub mod notify;
pub mod routes;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;
