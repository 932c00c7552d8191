pub mod command;
pub mod config;
pub mod decision;
pub mod error;
pub mod mission;
pub mod power;
pub mod recon;
pub mod safety;
pub mod sensors;
pub mod storage;
pub mod util;
pub mod vehicle;

pub mod web;
