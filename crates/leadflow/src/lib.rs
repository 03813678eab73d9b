pub mod app;
pub mod config;
pub mod db;
pub mod db_ops;
pub mod distribution;
pub mod error;
pub mod events;
pub mod handlers;
pub mod notifier;
pub mod scope;
pub mod storage;

pub use leadflow_models as models;
