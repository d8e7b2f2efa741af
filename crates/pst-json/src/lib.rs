//! Export the messages of Outlook PST/OST containers to JSON, one array per container.

pub mod args;
pub mod convert;
pub mod export;
