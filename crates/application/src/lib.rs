//! Application services and ports.

#![forbid(unsafe_code)]

mod monitor_ports;
mod monitor_service;

pub use monitor_ports::{AuditGateway, ProgressSink};
pub use monitor_service::{AuditMonitor, MonitorConfig, PollBackoff, WatchRequest};
