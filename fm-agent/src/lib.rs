pub mod agent;
pub mod config;
pub mod emitter;
pub mod event;
pub mod insights_client;
pub mod manifest;
pub mod matcher;
pub mod metrics;
pub mod output_writer;
pub mod runner;
pub mod snapshot;
pub mod storage;
pub mod tracker;
pub mod window;
