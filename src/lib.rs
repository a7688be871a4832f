//! Bumby: WhatsApp lead capture and keyword auto-reply service.

pub mod api;
pub mod autoreply;
pub mod campaigns;
pub mod config;
pub mod error;
pub mod leads;
pub mod store;
pub mod whatsapp;
