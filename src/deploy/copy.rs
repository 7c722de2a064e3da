use anyhow::{Result, anyhow};
use std::path::Path;

use super::{copy_if_stale, DeploymentKind, DeploymentParams, DeploymentTarget, FileDeployment, FileDeploymentRecord};

/// Copies one input file to one output file.
#[derive(Debug, Default)]
pub struct CopyDeployment {
    params: Option<DeploymentParams>,
    deployed: Vec<FileDeploymentRecord>,
}

impl CopyDeployment {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileDeployment for CopyDeployment {
    fn configure(
        &mut self,
        target: &DeploymentTarget,
        filter_path: &Path,
        input_file: &Path,
        output_file: &Path,
    ) {
        self.params = Some(DeploymentParams::new(target, filter_path, input_file, output_file));
    }

    fn deploy(&mut self) -> Result<()> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| anyhow!("copy deployment was not configured"))?;
        self.deployed.clear();

        let up_to_date = copy_if_stale(&params.input_file, &params.output_file)?;
        self.deployed.push(params.record(
            DeploymentKind::Copy,
            &params.input_file,
            &params.output_file,
            up_to_date,
        ));
        Ok(())
    }

    fn deployed_files(&self) -> &[FileDeploymentRecord] {
        &self.deployed
    }

    fn kind(&self) -> DeploymentKind {
        DeploymentKind::Copy
    }
}
