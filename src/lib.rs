//! Neural-network-parameterized topology optimization of 2D beams.
//!
//! A small fully-connected network maps element centroids to material
//! densities. Every epoch runs one finite element solve on the current
//! density field and one gradient step on the network weights, until the
//! design is essentially solid/void.

pub mod datatypes;
pub mod error;
pub mod loss;
pub mod mesher;
pub mod network;
pub mod post_processor;
pub mod solver;
pub mod trainer;
