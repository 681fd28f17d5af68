//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `run`       | `Run`            |
//! | `audit`     | `Audit`          |
//! | `incidents` | `Incidents`      |
//! | `stage`     | `Stage`          |
//! | `config`    | `Config`         |

pub mod audit;
pub mod config;
pub mod incidents;
pub mod run;
pub mod stage;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use incidents::cmd_incidents;
pub use run::{RunOverrides, cmd_run};
pub use stage::cmd_stage;
