use std::{fs, path::Path, path::PathBuf};

use anyhow::Error;
use link_protocol::{Envelope, Handshake};
use schemars::schema_for;

/// Write JSON schemas for the link wire types into `out_dir`.
/// Returns the files written.
pub fn write_schema(out_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(out_dir)?;

    let schemas = [
        ("envelope.schema.json", serde_json::to_string_pretty(&schema_for!(Envelope))?),
        ("handshake.schema.json", serde_json::to_string_pretty(&schema_for!(Handshake))?),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (file, json) in schemas {
        let path = out_dir.join(file);
        fs::write(&path, json)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn writes_envelope_and_handshake_schemas() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("schemas");
        let written = write_schema(&out).unwrap();
        assert_eq!(written.len(), 2);

        let envelope: Value = serde_json::from_str(&fs::read_to_string(out.join("envelope.schema.json")).unwrap()).unwrap();
        assert_eq!(envelope["title"], "Envelope");
        assert!(envelope["properties"]["requests"].is_object());

        let handshake: Value = serde_json::from_str(&fs::read_to_string(out.join("handshake.schema.json")).unwrap()).unwrap();
        assert!(handshake["properties"]["dsId"].is_object());
    }
}
