pub mod config;
pub mod cron;
pub mod db;
pub mod scheduler;
pub mod transport;
