//! Production USB host

mod host;

pub use host::{RusbConnection, RusbHost, map_rusb_error};
