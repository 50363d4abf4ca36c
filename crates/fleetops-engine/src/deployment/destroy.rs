//! Tearing resources down

use super::Deployment;
use crate::error::Result;
use crate::resolver::{DependencyGraph, run_ordered};
use crate::resource::Resource;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    /// Removed remotely and from the state
    pub destroyed: Vec<String>,
    /// The backend declined to destroy them; their rows stay
    pub kept: Vec<String>,
}

impl Deployment {
    /// Destroy the selected resources, obsolete ones included, in reverse
    /// dependency order
    #[tracing::instrument(skip_all, fields(deployment = %self.uuid))]
    pub async fn destroy_resources(
        &mut self,
        include: &[String],
        exclude: &[String],
        wipe: bool,
    ) -> Result<DestroyReport> {
        let targets = self.select(self.all_resources(), include, exclude);
        self.destroy_set(targets, wipe).await
    }

    pub(super) async fn destroy_set(
        &mut self,
        targets: Vec<Arc<dyn Resource>>,
        wipe: bool,
    ) -> Result<DestroyReport> {
        let graph = DependencyGraph::for_destroy(&targets);
        let state = self.ctx.state.clone();
        let uuid = self.uuid;
        let width = self.name_width();

        let results = run_ordered(targets, &graph, &self.ctx.interrupt, move |resource| {
            let state = state.clone();
            async move {
                let log = resource.handle().log().with_width(width);
                log.log(format!("destroying {}...", resource.show_type()));

                let gone = resource
                    .destroy(wipe)
                    .await
                    .inspect_err(|e| log.error(e.to_string()))?;
                if gone {
                    let id = resource.handle().id();
                    state
                        .transact(|doc| -> Result<()> {
                            doc.deployment_mut(&uuid)?.remove_resource(id);
                            Ok(())
                        })
                        .await?;
                    log.success("destroyed");
                } else {
                    log.warn("not destroyed, keeping it in the state");
                }
                Ok((resource.name().to_string(), gone))
            }
        })
        .await;

        // rows of destroyed resources are gone even when others failed
        self.reload()?;
        let results = results?;

        let mut report = DestroyReport::default();
        for (name, gone) in results {
            if gone {
                report.destroyed.push(name);
            } else {
                report.kept.push(name);
            }
        }
        report.destroyed.sort();
        report.kept.sort();
        Ok(report)
    }
}
