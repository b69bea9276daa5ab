//! Product services
//!
//! One service struct per resource type. Each owns a clone of the shared
//! [`Session`](crate::session::Session), decodes the resource's typed
//! configuration, and maps the product's status into the reconciliation loop.

pub mod compute;
pub mod database;
pub mod load_balancer;
pub mod messaging;
pub mod network;
