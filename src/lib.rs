//! Image Recognition Worker
//!
//! A single-node worker that drains a request queue, runs an external
//! image-recognition command for each job, records the outcome in a
//! PostgreSQL job store and an S3-compatible result bucket, and shuts its
//! host down after a run of idle polls so the fleet can scale in.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
