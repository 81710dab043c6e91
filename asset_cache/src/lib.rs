//! Offline asset cache.
//!
//! On startup a fixed manifest of assets is fetched from the origin and stored in a named cache.
//! Afterwards every request is answered from that cache, with a single fetch from the origin for
//! anything that was not installed.
pub mod endpoints;
pub mod network;
pub mod store;
pub mod worker;
