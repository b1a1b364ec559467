pub mod run;
pub mod start;
pub mod status;
pub mod stop;

use clap::Args;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Start the scheduler even when BACKUP_SCHEDULER_ENABLED is not set
    #[arg(long)]
    pub force: bool,
}
