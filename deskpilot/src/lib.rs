//! Automation of a legacy Win32 data-entry application
//!
//! The driven application exposes no API and no accessibility metadata, so
//! controls are found by class name and geometry, driven with window
//! messages and keystrokes, and every effect is read back before moving on.
//! Results are reconciled with a spreadsheet of record through content
//! fingerprints, since its rows carry no stable key.

pub mod actions;
pub mod artifacts;
pub mod config;
pub mod descriptor;
pub mod element;
pub mod errors;
pub mod export;
pub mod locator;
pub mod pipeline;
pub mod platforms;
pub mod popups;
pub mod reconcile;
pub mod session;
pub mod store;
#[cfg(test)]
mod tests;
pub mod utils;

pub use actions::Actions;
pub use config::{RobotConfig, Timings};
pub use descriptor::{ControlDescriptor, WindowQuery};
pub use element::{ControlSnapshot, Rect, WindowHandle};
pub use errors::AutomationError;
pub use locator::Locator;
pub use pipeline::{run, RunReport};
pub use platforms::{create_window_system, WindowSystem};
pub use popups::{PopupCatalog, PopupHandler, PopupKind};
pub use reconcile::{fingerprint, PendingBatch, RowMap};
pub use session::{Outcome, Session};
pub use store::{MemoryStore, RowStore, SheetsStore, StoreError};
