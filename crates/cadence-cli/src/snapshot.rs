use std::path::Path;

use cadence_core::error::Result;
use cadence_scheduler::{Job, JobCreate};

/// Read a JSON array of job definitions.
pub fn load(path: &Path) -> Result<Vec<JobCreate>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `jobs` in the format [`load`] accepts. Identity and run history are
/// not part of a snapshot; restored jobs get fresh ids and next runs.
pub fn save(path: &Path, jobs: &[Job]) -> Result<()> {
    let inputs: Vec<JobCreate> = jobs.iter().cloned().map(JobCreate::from).collect();
    let json = serde_json::to_string_pretty(&inputs)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}
