pub mod app;
pub mod config;
pub mod curation;
pub mod db;
pub mod error;
pub mod models;
