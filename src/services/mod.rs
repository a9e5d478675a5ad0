//! Business logic services
//!
//! This module contains the provisioning logic separated from HTTP concerns.
//! Services are stateless and receive the config store and their
//! collaborators by reference, so they can be tested with mocks.

pub mod config_store;
pub mod identity;
pub mod network;
pub mod wifi;
