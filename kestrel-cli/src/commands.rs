//! Command dispatch
//!
//! Maps CLI invocation shapes onto lifecycle operations.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize as _;
use kestrel_client::NeosApi;
use kestrel_core::JobHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::{JobDriver, Outcome};

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a problem and return immediately, queueing the job handle
    Submit {
        /// Problem stub; `<stub>.nl` must exist
        stub: Option<String>,
    },
    /// Retrieve results for the most recently submitted job
    Retrieve {
        /// Problem stub used to name the `<stub>.sol` result file
        stub: Option<String>,
    },
    /// Cancel a job on the remote server
    Kill {
        /// Job number; defaults to the job= entry in kestrel_options
        #[arg(requires = "password")]
        job_number: Option<i32>,
        /// Job password
        password: Option<String>,
    },
    /// Submit a problem and wait for its results
    Solve {
        /// Problem stub; `<stub>.nl` must exist
        stub: Option<String>,
    },
}

/// Route a command to its lifecycle operation.
pub async fn handle_command<C: NeosApi + 'static>(
    command: Commands,
    driver: &JobDriver<C>,
) -> Result<Outcome> {
    match command {
        Commands::Submit { stub } => driver.submit(&stub_or_default(stub, driver)).await,
        Commands::Retrieve { stub } => driver.retrieve(&stub_or_default(stub, driver)).await,
        Commands::Kill {
            job_number,
            password,
        } => {
            let job = match (job_number, password) {
                (Some(number), Some(password)) => Some(JobHandle::new(number, password)),
                _ => driver.config().job_override.clone(),
            };
            match job {
                Some(job) => driver.kill(&job).await,
                None => {
                    println!("{}", "No job to kill.".yellow());
                    println!(
                        "Pass a job number and password, or set kestrel_options \"job=#### password=xxxx\"."
                    );
                    Ok(Outcome::Failure)
                }
            }
        }
        Commands::Solve { stub } => {
            let cancel = interrupt_token();
            driver.solve(&stub_or_default(stub, driver), cancel).await
        }
    }
}

fn stub_or_default<C: NeosApi + 'static>(stub: Option<String>, driver: &JobDriver<C>) -> String {
    stub.unwrap_or_else(|| driver.config().default_stub.clone())
}

/// Token cancelled when the user interrupts the process. The operations
/// check it only between remote calls; an in-flight call is never torn down.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler.cancel();
        }
    });
    token
}
