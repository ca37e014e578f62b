//! Upload of the closed window followed by the local retention sweep

use crate::harvest::names::NameResolver;
use crate::pipeline::Pipeline;
use crate::remote::ObjectStore;

pub async fn run<R: NameResolver, S: ObjectStore>(pipeline: &Pipeline<R, S>) {
    tracing::debug!("Upload worker tick");
    let report = pipeline.upload_tick().await;
    if report.ran && report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            "Some artifacts were not uploaded; they stay local until retried or swept"
        );
    }
    pipeline.sweep_local().await;
}
