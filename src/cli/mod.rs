pub mod app;
pub mod commands;
pub mod context;
pub mod env;
pub mod output;
pub mod run;
pub mod runtime;
pub mod serve;
pub mod validate;

pub use run::{cmd_run, RunArgs};
pub use serve::{cmd_serve, ServeArgs};
pub use validate::{cmd_validate, ValidateArgs};
