//! Bytebeam device protocol: message types and topic layout
//!
//! This module defines the payload shapes exchanged with the cloud and the
//! topic hierarchy they travel on.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
