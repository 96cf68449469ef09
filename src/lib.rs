pub mod config;
pub mod context;
pub mod process;
pub mod service;
pub mod settings;
pub mod status;
pub mod supervisor;
pub mod viewport;

pub use config::{ConfigDocument, ConfigStore, ConsoleArgs, ConsoleConfig, ServiceEntry};
pub use context::AppContext;
pub use service::{ServiceController, ServiceStatus};
pub use status::{ConsoleState, LineTag, OutputLine, StatusModel};
pub use supervisor::{ConsoleEvent, ConsoleSupervisor, StatusObserver, SupervisorError};
pub use viewport::TabViewport;
