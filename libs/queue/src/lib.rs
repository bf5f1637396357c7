//! The work-queue message schema (spec.md §3, §4.4, §6) and a small consumer loop on
//! top of [`kv::Store::blpop_one`].

pub mod consumer;
pub mod messages;

pub use consumer::{run_consumer, HandleError, MessageHandler};
pub use messages::{IntentMessage, ServiceDescriptor, ServiceType, ValidationError};
