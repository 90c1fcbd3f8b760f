//! Domain models for billing-service.

mod business;
mod customer;
mod invoice;
mod line_item;
mod money;
mod product;
mod shop;

pub use business::{Business, UpdateBusinessSettings};
pub use customer::{Customer, ListCustomersFilter, NewCustomer, UpdateCustomer};
pub use invoice::{
    can_transition, format_invoice_number, resolve_patch, Invoice, InvoicePatch, InvoiceStatus,
    InvoiceSummary, InvoiceWithCustomer, ListInvoicesFilter, NewInvoice, PatchOutcome,
};
pub use line_item::{InvoiceItem, NewInvoiceItem};
pub use money::{compute_line, compute_totals, round_money, InvoiceTotals, LineAmounts, TaxType};
pub use product::{ListProductsFilter, NewProduct, Product, UpdateProduct};
pub use shop::{Shop, UpdateShop};
