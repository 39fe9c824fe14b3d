pub mod assigner;
pub mod cluster;
pub mod config;
pub mod drone;
pub mod geo;
pub mod hexgrid;
pub mod pathfinder;
pub mod probability;
pub mod sector;
pub mod worker;
