pub mod api;
pub mod clients;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod fraud;
pub mod geo;
pub mod locks;
pub mod logging;
pub mod mem_store;
pub mod signals;
pub mod sled_store;
pub mod stake;
pub mod store;
