pub mod config;
pub mod db;
pub mod delivery;
pub mod jobs;
pub mod logging;
