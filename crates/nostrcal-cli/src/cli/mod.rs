pub mod calendar;
pub mod config;
pub mod opener;

pub use calendar::{parse_calendar_time, render_entry};
pub use config::{default_data_dir, CliConfig, Credentials};
pub use opener::DesktopOpener;
