pub mod clock;
pub mod config;
pub mod db;
pub mod environment;
pub mod errors;
pub mod gate;
pub mod group;
pub mod identity;
pub mod normalization;
pub mod project;
pub mod routes;
pub mod submission;
pub mod timestamp;
pub mod urls;
mod validation;
