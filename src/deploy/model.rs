use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result, anyhow};
use log::{debug, warn};

use super::{copy_if_stale, DeploymentKind, DeploymentParams, DeploymentTarget, FileDeployment, FileDeploymentRecord};

/// Statements in a `.mtl` file whose last token names a texture file.
const TEXTURE_STATEMENTS: &[&str] = &[
    "map_ka", "map_kd", "map_ks", "map_ke", "map_ns", "map_d", "map_bump", "map_disp",
    "map_pr", "map_pm", "map_ps", "map_kn", "bump", "disp", "decal", "refl", "norm",
];

/// Deploys a Wavefront `.obj` model together with the files it depends on.
///
/// The model references material libraries (`mtllib`), which in turn reference textures.
/// Each dependency is copied to the same relative location next to the deployed model, so the
/// relative references inside the files stay valid. Files are copied verbatim.
#[derive(Debug, Default)]
pub struct ModelDeployment {
    params: Option<DeploymentParams>,
    deployed: Vec<FileDeploymentRecord>,
}

impl ModelDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    fn deploy_dependency(
        &mut self,
        params: &DeploymentParams,
        seen: &mut HashSet<PathBuf>,
        input_dir: &Path,
        output_dir: &Path,
        reference: &str,
    ) -> Result<Option<PathBuf>> {
        let relative = dependency_location(reference);
        let input = input_dir.join(reference);
        let output = output_dir.join(&relative);

        if !input.is_file() {
            warn!("Model {:?} references missing file {:?}", params.input_file, input);
            return Ok(None);
        }
        if !seen.insert(output.clone()) {
            return Ok(None);
        }

        let up_to_date = copy_if_stale(&input, &output)?;
        self.deployed
            .push(params.record(DeploymentKind::Model, &input, &output, up_to_date));
        Ok(Some(input))
    }
}

impl FileDeployment for ModelDeployment {
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
            .clone()
            .ok_or_else(|| anyhow!("model deployment was not configured"))?;
        self.deployed.clear();

        let up_to_date = copy_if_stale(&params.input_file, &params.output_file)?;
        self.deployed.push(params.record(
            DeploymentKind::Model,
            &params.input_file,
            &params.output_file,
            up_to_date,
        ));

        let input_dir = parent_dir(&params.input_file);
        let output_dir = parent_dir(&params.output_file);
        let mut seen = HashSet::from([params.output_file.clone()]);

        let model = read_lossy(&params.input_file)?;
        for library in statement_arguments(&model, &["mtllib"]) {
            let Some(material_file) =
                self.deploy_dependency(&params, &mut seen, &input_dir, &output_dir, &library)?
            else {
                continue;
            };

            // Texture references are relative to the material library, not the model.
            let material_in_dir = parent_dir(&material_file);
            let material_out_dir = parent_dir(&output_dir.join(dependency_location(&library)));
            let material = read_lossy(&material_file)?;
            for texture in statement_arguments(&material, TEXTURE_STATEMENTS) {
                self.deploy_dependency(
                    &params,
                    &mut seen,
                    &material_in_dir,
                    &material_out_dir,
                    &texture,
                )?;
            }
        }

        debug!(
            "Model {:?} deployed as {} file(s)",
            params.input_file,
            self.deployed.len()
        );
        Ok(())
    }

    fn deployed_files(&self) -> &[FileDeploymentRecord] {
        &self.deployed
    }

    fn kind(&self) -> DeploymentKind {
        DeploymentKind::Model
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Where a referenced file lands relative to the deployed file that references it.
///
/// Plain relative references keep their layout. Absolute references and references that climb
/// out of the source directory are flattened to their file name.
fn dependency_location(reference: &str) -> PathBuf {
    let path = Path::new(reference);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        path.file_name().map(PathBuf::from).unwrap_or_default()
    } else {
        path.to_path_buf()
    }
}

/// File arguments of the given statements, in file order.
///
/// `mtllib` may list several libraries on one line. Texture statements may carry options
/// (`-bm 0.5`, `-clamp on`) before the file name, so only their last token is taken.
fn statement_arguments(source: &str, statements: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    for line in source.lines() {
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        let keyword = keyword.to_lowercase();
        if !statements.contains(&keyword.as_str()) {
            continue;
        }
        let args: Vec<&str> = tokens.collect();
        if keyword == "mtllib" {
            found.extend(args.iter().map(|a| a.to_string()));
        } else if let Some(last) = args.last() {
            found.push(last.to_string());
        }
    }
    found
}
