pub mod api;
pub mod cache;
pub mod consumer;
pub mod db;
pub mod models;
pub mod server;
