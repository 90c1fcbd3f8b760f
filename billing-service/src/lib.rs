//! Billing Service - Invoice lifecycle for small businesses.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
