//! `flowgate validate`: check a definition file offline.

use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;

use flowgate_core::workflow::definition::{WorkflowDraft, validate_draft};

pub async fn validate(file: &Path, json: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let draft: WorkflowDraft =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a workflow definition", file.display()))?;

    let result = validate_draft(&draft);

    if json {
        let report = serde_json::json!({
            "file": file.display().to_string(),
            "name": draft.name,
            "steps": draft.steps.len(),
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if result.is_ok() {
        println!(
            "  {} {} ({} steps, starts at '{}')",
            style("✓").green().bold(),
            style(&draft.name).bold(),
            draft.steps.len(),
            draft.start_step_id
        );
    }

    if let Err(e) = result {
        bail!("invalid workflow definition: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn write_definition(dir: &tempfile::TempDir, start: &str) -> std::path::PathBuf {
        let path = dir.path().join("wf.json");
        let body = json!({
            "name": "Report",
            "organization_id": Uuid::now_v7(),
            "created_by": Uuid::now_v7(),
            "start_step_id": start,
            "steps": [{ "id": "gate", "name": "Gate", "type": "approval" }]
        });
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn accepts_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_definition(&dir, "gate");
        validate(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_start_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_definition(&dir, "ghost");
        let err = validate(&path, true).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate(&dir.path().join("absent.json"), false).await.is_err());
    }
}
