//! # LeadCRM Core
//!
//! Shared building blocks for every LeadCRM crate:
//! - `types`: Users, Leads, scheduled messages/contacts, templates
//! - `traits`: seams between the scheduler and its collaborators
//!   (`Clock`, `SchedulerStore`, `DeliveryGateway`)
//! - `config`: TOML configuration with env overrides
//! - `error`: `CrmError` / `DeliveryError`
//! - `template`: fixed-placeholder message personalization

pub mod config;
pub mod error;
pub mod template;
pub mod traits;
pub mod types;

pub use config::CrmConfig;
pub use error::{CrmError, DeliveryError, Result};
pub use traits::{Clock, DeliveryGateway, SchedulerStore, SystemClock};
pub use types::*;
