pub mod config;
pub mod handlers;
pub mod history;
pub mod humanize;
pub mod runner;
pub mod scheduler;
