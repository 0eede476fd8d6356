// Prediction validation and scoring engine for the lineup prediction game.
//
// The transport and the concrete store live in `lineup-server`; this crate
// holds the rules and the operations built on them.

pub mod auth;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod scoring;
pub mod store;
pub mod validate;
