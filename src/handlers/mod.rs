// src/handlers/mod.rs

pub mod results;
pub mod session;
