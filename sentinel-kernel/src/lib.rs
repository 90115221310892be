/**
 * SENTINEL KERNEL - Fleet telemetry hub
 *
 * ROLE: Fleet registry, log store, ingestion gateway, realtime fan-out and
 * analysis delegation, wired behind one HTTP surface (see `http`).
 */

pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod health;
pub mod http;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod sampler;
pub mod state;
pub mod store;
pub mod ticker;
