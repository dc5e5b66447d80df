pub mod classify;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod http;
pub mod ica;
pub mod manifest;
pub mod output;
pub mod planner;
pub mod report;
pub mod rsync;
pub mod s3;
pub mod tool;
pub mod transport;
