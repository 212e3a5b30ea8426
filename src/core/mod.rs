pub mod config;
pub mod data;
pub mod delivery;
pub mod functions;
pub mod job;
pub mod series;
pub mod terminal;
