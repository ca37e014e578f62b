//! Remote retention sweep (daily)

use crate::harvest::names::NameResolver;
use crate::pipeline::Pipeline;
use crate::remote::ObjectStore;

pub async fn run<R: NameResolver, S: ObjectStore>(pipeline: &Pipeline<R, S>) {
    tracing::debug!("Remote sweep worker tick");
    let report = pipeline.sweep_remote().await;
    if !report.complete {
        tracing::warn!(
            scanned = report.scanned,
            deleted = report.deleted,
            "Remote sweep stopped early; remaining objects are handled next run"
        );
    }
}
