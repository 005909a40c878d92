pub mod cli;
pub mod domain;
pub mod itunes;
pub mod repository;
pub mod services;
pub mod utils;
