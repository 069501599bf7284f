//! Administrative request portal for the university computing centre.
//!
//! Students submit requests, departmental authorities process them, and the
//! director general signs them off. Every transition goes through
//! [`workflows::requests::lifecycle`] and fans out in-app notifications and
//! emails through [`workflows::requests::notify`].

pub mod config;
pub mod error;
pub mod mail;
pub mod telemetry;
pub mod workflows;
