pub mod commands;
pub mod config;
pub mod network;
pub mod report;
pub mod runner;
pub mod types;
pub mod validation;

pub use commands::{clear_dns_cache, get_current_dns, render};
pub use config::{ProfileSet, get_profiles_path, load_profiles, write_sample_profiles};
pub use network::{TargetSelection, list_adapters, select_all_up, select_named};
pub use report::{apply, plan};
pub use runner::{CommandRunner, SystemRunner};
pub use types::{AddressFamily, Intent, Report};
