//! Collection tick (short period)

use crate::harvest::names::NameResolver;
use crate::pipeline::Pipeline;
use crate::remote::ObjectStore;

pub async fn run<R: NameResolver, S: ObjectStore>(pipeline: &Pipeline<R, S>) {
    tracing::debug!("Collection worker tick");
    let report = pipeline.collect_tick().await;
    if report.failed_containers > 0 {
        tracing::warn!(
            failed = report.failed_containers,
            "Some containers could not be collected this tick"
        );
    }
}
