//! File copies between the local machine and remote endpoints.

mod engine;
mod local;
mod path;
mod plan;
mod progress;
mod remote;
mod types;

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, FileFailure, TransferError};
use engine::{Transfer, TransferOptions};
use local::LocalBackend;
use plan::CopyDirection;
use remote::SftpBackend;

pub use engine::TransferReport;
pub use plan::{CopyPlan, EndpointResolver};
pub use progress::{ConsoleSink, ProgressSink};

/// Execute `plan`, one source after another.
///
/// Uploads share one remote backend. Each download source opens its own;
/// when that connection fails the source is recorded as failed and the
/// next one is tried.
pub async fn run_copy(
    plan: &CopyPlan,
    progress: Arc<dyn ProgressSink>,
) -> Result<TransferReport, Error> {
    let options = TransferOptions {
        recursive: plan.recursive,
        ..Default::default()
    };
    let local = LocalBackend;
    let mut report = TransferReport::default();

    match &plan.direction {
        CopyDirection::Upload { sources, target } => {
            let remote = SftpBackend::connect(&target.endpoint).await?;
            let transfer = Transfer::new(&local, &remote, options, progress);
            for source in sources {
                report.merge(transfer.run(source, &target.path).await);
            }
            remote.close().await;
        }
        CopyDirection::Download { sources, target } => {
            for source in sources {
                info!("Downloading {} from server {}", source.path, source.id);
                let remote = match SftpBackend::connect(&source.endpoint).await {
                    Ok(remote) => remote,
                    Err(err) => {
                        let failure =
                            FileFailure::new(source.raw.as_str(), TransferError::Connect(err));
                        progress.failed(&failure);
                        report.failures.push(failure);
                        continue;
                    }
                };
                let transfer = Transfer::new(&remote, &local, options, progress.clone());
                report.merge(transfer.run(&source.path, target).await);
                remote.close().await;
            }
        }
    }

    info!(
        "Copy finished: {} copied, {} failed",
        report.copied.len(),
        report.failures.len()
    );
    Ok(report)
}
