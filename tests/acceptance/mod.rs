//! Acceptance tests for the interrupt bridge and I2C transport.
//!
//! Every test runs against `SimulatedLine` and `SimulatedSensorHub`, so the
//! watcher thread, wake channel, and dispatch are the production code paths.

mod common;
mod end_to_end_test;
mod lifecycle_test;
mod stress_test;
