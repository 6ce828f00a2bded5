pub mod app;
pub mod cli;
pub mod config;
pub mod gpio;
pub mod logger;
pub mod media;
pub mod mpv;
pub mod outlet;
pub mod tools;
