//! UI components for the PMR monitor.

pub mod monitor_window;

pub use monitor_window::MonitorWindow;
