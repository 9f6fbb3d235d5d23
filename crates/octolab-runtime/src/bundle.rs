//! Builds the tar.gz project bundle uploaded to a lab's guest agent via
//! `upload_project`. A recipe's blueprint is a JSON map of relative path
//! to file contents (at minimum a `docker-compose.yml`); this module
//! packs that into the `{bundle: base64 tar.gz}` shape the guest agent
//! expects.

use std::io::Write;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use octolab_core::lab::Lab;
use octolab_core::vsock_protocol::MAX_BUNDLE_BYTES;

/// Build the base64-encoded tar.gz for a lab's recipe blueprint.
/// `lab.requested_intent` may carry recipe-specific substitutions that
/// have already been merged into the blueprint by the lab service before
/// this is called; this function only packs, it does not interpret
/// recipe semantics.
pub fn load_recipe_bundle_base64(lab: &Lab) -> Result<String> {
    let blueprint = lab
        .requested_intent
        .get("blueprint")
        .cloned()
        .unwrap_or(lab.requested_intent.clone());

    let files = blueprint
        .as_object()
        .context("recipe blueprint must be a JSON object of path -> file contents")?;
    if files.is_empty() {
        bail!("recipe blueprint has no files to bundle");
    }

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, contents) in files {
            let contents = contents
                .as_str()
                .with_context(|| format!("blueprint file {path} is not a string"))?;
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .with_context(|| format!("failed to append {path} to bundle"))?;
        }
        builder.finish().context("failed to finalize tar archive")?;
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_bytes)
        .context("failed to gzip bundle")?;
    let gz_bytes = encoder.finish().context("failed to finish gzip stream")?;

    if gz_bytes.len() > MAX_BUNDLE_BYTES {
        bail!(
            "recipe bundle is {} bytes, exceeds the {} byte limit",
            gz_bytes.len(),
            MAX_BUNDLE_BYTES
        );
    }

    Ok(BASE64.encode(gz_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use octolab_core::lab::{EvidenceState, LabStatus, RuntimeMeta};
    use uuid::Uuid;

    fn sample_lab(blueprint: serde_json::Value) -> Lab {
        Lab {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            recipe_id: Uuid::new_v4(),
            status: LabStatus::Requested,
            runtime: None,
            runtime_meta: RuntimeMeta::default(),
            connection_url: None,
            requested_intent: serde_json::json!({ "blueprint": blueprint }),
            expires_at: None,
            evidence_state: EvidenceState::Collecting,
            evidence_finalized_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_recipe_bundle_base64_roundtrips_through_gzip() {
        let lab = sample_lab(serde_json::json!({
            "docker-compose.yml": "version: \"3\"\nservices:\n  attacker: {}\n",
        }));
        let encoded = load_recipe_bundle_base64(&lab).unwrap();
        assert!(!encoded.is_empty());
        let decoded = BASE64.decode(encoded).unwrap();
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_empty_blueprint_rejected() {
        let lab = sample_lab(serde_json::json!({}));
        assert!(load_recipe_bundle_base64(&lab).is_err());
    }
}
