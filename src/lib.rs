pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod output;
pub mod rds;
pub mod table;
