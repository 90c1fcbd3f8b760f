//! HTTP handlers for billing-service.

pub mod businesses;
pub mod customers;
pub mod invoices;
pub mod products;
pub mod shops;
