pub mod changelog;
pub mod config;
pub mod discover;
pub mod pending;
pub mod queue;
pub mod research;
pub mod reviews;
pub mod run;
pub mod scan;
pub mod status;
