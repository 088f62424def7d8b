//! cb-providers: adapters that pull data out of external learning and
//! content providers and write canonical rows through cb-db.
//!
//! The [`service::ProviderService`] trait is the capability set every LMS
//! adapter exposes; [`service::create_service`] builds one from a stored
//! credential. Open-content jobs (library scraping, video imports) live in
//! [`kiwix`] and [`videos`].

pub mod assets;
pub mod brightspace;
pub mod export;
pub mod http;
pub mod kiwix;
pub mod records;
pub mod service;
pub mod token;
pub mod tool;
pub mod videos;

pub use service::{create_service, ImportSummary, ProviderService, ServiceContext};
pub use token::RefreshLocks;
