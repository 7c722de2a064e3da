//! # File Deployment
//!
//! Produces output files for an application's assets after it was built. Each input file is
//! handled by one [`FileDeployment`] variant, chosen by [`deployment_for`]:
//!
//! 1.  **Copy** (`copy.rs`): one input, one output, skipped when the output is already up to date.
//! 2.  **Model** (`model.rs`): a Wavefront `.obj` plus the material libraries and textures it
//!     references, i.e. one input expanding to several outputs.
//!
//! Directories are expanded into individual files by [`collect_inputs`] before a variant is chosen.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::debug;
use walkdir::WalkDir;

mod copy;
mod model;

pub use copy::CopyDeployment;
pub use model::ModelDeployment;

/// The application on whose behalf a deployment runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    /// Display label of the application (usually its executable's file name).
    pub app: String,
    /// Build configuration, if the invocation named one.
    pub configuration: Option<String>,
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.configuration {
            Some(configuration) => write!(f, "{} ({})", self.app, configuration),
            None => f.write_str(&self.app),
        }
    }
}

/// Which variant produced a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentKind {
    Copy,
    Model,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Copy => f.write_str("copy"),
            DeploymentKind::Model => f.write_str("model"),
        }
    }
}

/// One file produced (or found up to date) by a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDeploymentRecord {
    pub app: String,
    pub kind: DeploymentKind,
    /// Directory of the input relative to the asset root it was collected from.
    pub filter_path: PathBuf,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    /// `true` if the output already matched the input and nothing was written.
    pub up_to_date: bool,
}

/// A pluggable strategy that deploys one input file.
///
/// `configure` only captures parameters. All filesystem work happens in `deploy`, after which
/// `deployed_files` lists every produced output in the order it was produced.
pub trait FileDeployment: Send {
    /// Sets the parameters for one deployment operation.
    fn configure(
        &mut self,
        target: &DeploymentTarget,
        filter_path: &Path,
        input_file: &Path,
        output_file: &Path,
    );

    /// Performs the copy/expansion. Fails on I/O errors or when not configured.
    fn deploy(&mut self) -> Result<()>;

    /// Files produced by the last `deploy` call.
    fn deployed_files(&self) -> &[FileDeploymentRecord];

    /// The variant this strategy implements.
    fn kind(&self) -> DeploymentKind;
}

/// Parameters captured by `configure`, shared by all variants.
#[derive(Debug, Clone)]
pub(crate) struct DeploymentParams {
    pub target: DeploymentTarget,
    pub filter_path: PathBuf,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
}

impl DeploymentParams {
    pub(crate) fn new(
        target: &DeploymentTarget,
        filter_path: &Path,
        input_file: &Path,
        output_file: &Path,
    ) -> Self {
        Self {
            target: target.clone(),
            filter_path: filter_path.to_path_buf(),
            input_file: input_file.to_path_buf(),
            output_file: output_file.to_path_buf(),
        }
    }

    pub(crate) fn record(
        &self,
        kind: DeploymentKind,
        input_file: &Path,
        output_file: &Path,
        up_to_date: bool,
    ) -> FileDeploymentRecord {
        FileDeploymentRecord {
            app: self.target.app.clone(),
            kind,
            filter_path: self.filter_path.clone(),
            input_file: input_file.to_path_buf(),
            output_file: output_file.to_path_buf(),
            up_to_date,
        }
    }
}

/// Picks the deployment variant for an input file by its extension.
pub fn deployment_for(input_file: &Path) -> Box<dyn FileDeployment> {
    let ext = input_file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "obj" => Box::new(ModelDeployment::new()),
        _ => Box::new(CopyDeployment::new()),
    }
}

/// Expands an asset path into `(filter_path, input_file)` pairs.
///
/// A file yields itself with an empty filter path. A directory yields every file below it,
/// each with its parent directory relative to `asset_path` as filter path. Results are sorted
/// for deterministic output.
pub fn collect_inputs(asset_path: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let meta = fs::metadata(asset_path)
        .with_context(|| format!("cannot read asset path {}", asset_path.display()))?;
    if meta.is_file() {
        return Ok(vec![(PathBuf::new(), asset_path.to_path_buf())]);
    }

    let mut inputs = Vec::new();
    for entry in WalkDir::new(asset_path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("cannot walk {}", asset_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let filter = path
            .parent()
            .and_then(|p| p.strip_prefix(asset_path).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!("Collected asset {:?} (filter {:?})", path, filter);
        inputs.push((filter, path.to_path_buf()));
    }
    Ok(inputs)
}

/// Outcome of [`deploy_asset`].
#[derive(Debug, Default)]
pub struct AssetDeployment {
    /// Every file written (or found up to date), including those produced before a failure.
    pub records: Vec<FileDeploymentRecord>,
    /// The error that stopped the asset, if any.
    pub failure: Option<anyhow::Error>,
}

/// Deploys one asset path (file or directory) below `output_dir`.
///
/// Every collected input lands at `output_dir/<filter_path>/<file name>` through the variant
/// [`deployment_for`] picks. The first failing input stops the asset; records of the files
/// already on disk are kept in the outcome.
pub fn deploy_asset(target: &DeploymentTarget, asset_path: &Path, output_dir: &Path) -> AssetDeployment {
    let mut outcome = AssetDeployment::default();
    let inputs = match collect_inputs(asset_path) {
        Ok(inputs) => inputs,
        Err(err) => {
            outcome.failure = Some(err);
            return outcome;
        }
    };

    for (filter_path, input_file) in inputs {
        let Some(file_name) = input_file.file_name() else {
            continue;
        };
        let output_file = output_dir.join(&filter_path).join(file_name);

        let mut deployment = deployment_for(&input_file);
        deployment.configure(target, &filter_path, &input_file, &output_file);
        let result = deployment.deploy();
        // A model can fail on a dependency after its own file was written.
        outcome.records.extend(deployment.deployed_files().iter().cloned());
        if let Err(err) = result {
            let kind = deployment.kind();
            outcome.failure =
                Some(err.context(format!("{} deployment of {} failed", kind, input_file.display())));
            break;
        }
    }
    outcome
}

/// Copies `input` to `output` unless `output` is already up to date.
///
/// Up to date means: same length, and modified no earlier than the input. Missing parent
/// directories of `output` are created. Returns `true` if the copy was skipped.
pub(crate) fn copy_if_stale(input: &Path, output: &Path) -> Result<bool> {
    let src_meta = fs::metadata(input)
        .with_context(|| format!("cannot read {}", input.display()))?;

    if let Ok(dst_meta) = fs::metadata(output) {
        let same_len = dst_meta.len() == src_meta.len();
        let newer = match (src_meta.modified(), dst_meta.modified()) {
            (Ok(src), Ok(dst)) => dst >= src,
            _ => false,
        };
        if same_len && newer {
            debug!("Up to date: {:?}", output);
            return Ok(true);
        }
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::copy(input, output)
        .with_context(|| format!("cannot copy {} to {}", input.display(), output.display()))?;
    debug!("Copied {:?} -> {:?}", input, output);
    Ok(false)
}

#[cfg(test)]
pub(crate) fn test_target() -> DeploymentTarget {
    DeploymentTarget {
        app: "hello_world.exe".to_string(),
        configuration: Some("Debug".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_variant_by_extension() {
        assert_eq!(deployment_for(Path::new("a/b/cube.OBJ")).kind(), DeploymentKind::Model);
        assert_eq!(deployment_for(Path::new("a/b/basic.vert")).kind(), DeploymentKind::Copy);
        assert_eq!(deployment_for(Path::new("README")).kind(), DeploymentKind::Copy);
    }

    #[test]
    fn collects_single_file_with_empty_filter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tex.png");
        fs::write(&file, b"png").unwrap();

        let inputs = collect_inputs(&file).unwrap();
        assert_eq!(inputs, vec![(PathBuf::new(), file)]);
    }

    #[test]
    fn collects_directory_with_relative_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("models/sponza")).unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::write(dir.path().join("models/sponza/sponza.obj"), b"o").unwrap();

        let inputs = collect_inputs(dir.path()).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs.contains(&(PathBuf::new(), dir.path().join("readme.txt"))));
        assert!(inputs.contains(&(
            PathBuf::from("models").join("sponza"),
            dir.path().join("models/sponza/sponza.obj")
        )));
    }

    #[test]
    fn collect_fails_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_inputs(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn target_label_names_configuration() {
        assert_eq!(test_target().to_string(), "hello_world.exe (Debug)");
        let untyped = DeploymentTarget {
            app: "tool.exe".to_string(),
            configuration: None,
        };
        assert_eq!(untyped.to_string(), "tool.exe");
    }

    #[test]
    fn failed_input_keeps_records_of_earlier_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        let out = dir.path().join("out");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("a.txt"), b"a").unwrap();
        fs::write(assets.join("b.txt"), b"b").unwrap();
        // A directory where b.txt should go makes its copy fail.
        fs::create_dir_all(out.join("b.txt")).unwrap();

        let outcome = deploy_asset(&test_target(), &assets, &out);
        assert!(out.join("a.txt").is_file());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].output_file, out.join("a.txt"));
        let failure = format!("{:#}", outcome.failure.unwrap());
        assert!(failure.contains("b.txt"), "{}", failure);
    }

    #[test]
    fn missing_asset_path_fails_without_records() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = deploy_asset(&test_target(), &dir.path().join("nope"), &dir.path().join("out"));
        assert!(outcome.records.is_empty());
        assert!(outcome.failure.is_some());
    }

    #[test]
    fn copy_if_stale_skips_fresh_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out/nested/in.bin");
        fs::write(&input, b"payload").unwrap();

        assert!(!copy_if_stale(&input, &output).unwrap());
        assert_eq!(fs::read(&output).unwrap(), b"payload");
        assert!(copy_if_stale(&input, &output).unwrap());
    }
}
