//! `conductor validate`

use conductor_core::{format_error_for_cli, parse_sequence_json, MusicalSequence};
use std::path::{Path, PathBuf};

/// Parse and validate one sequence file
pub fn check_file(path: &Path) -> Result<MusicalSequence, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_sequence_json(&json).map_err(|e| format_error_for_cli(&e))
}

pub fn run(files: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed = 0;

    for path in files {
        match check_file(path) {
            Ok(sequence) => println!(
                "✅ {} - {} ({} movement(s), {} beat(s))",
                path.display(),
                sequence.id,
                sequence.movements.len(),
                sequence.beat_count()
            ),
            Err(report) => {
                failed += 1;
                println!("❌ {}", path.display());
                for line in report.lines().filter(|l| !l.trim().is_empty()) {
                    println!("   {}", line);
                }
            }
        }
    }

    println!();
    if failed == 0 {
        println!("All {} file(s) valid.", files.len());
        Ok(())
    } else {
        println!("{} of {} file(s) invalid.", failed, files.len());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_file_accepts_valid_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.json");
        std::fs::write(
            &path,
            r#"{
                "id": "drag-drop",
                "name": "Drag and Drop",
                "movements": [
                    { "id": "drag", "name": "Drag", "beats": [
                        { "beat": 1, "event": "drag:start", "handler": "start" },
                        { "beat": 2, "event": "drag:drop", "handler": "drop", "timing": "synchronized" }
                    ] }
                ]
            }"#,
        )
        .unwrap();

        let sequence = check_file(&path).unwrap();
        assert_eq!(sequence.id, "drag-drop");
        assert_eq!(sequence.beat_count(), 2);
    }

    #[test]
    fn test_check_file_reports_every_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{ "id": "broken", "name": "", "movements": [
                { "id": "m", "name": "M", "beats": [
                    { "beat": 1, "event": "", "handler": "a" },
                    { "beat": 1, "event": "x", "handler": "" }
                ] }
            ] }"#,
        )
        .unwrap();

        let report = check_file(&path).unwrap_err();
        assert!(report.contains("'broken'"), "{report}");
        assert!(report.contains("4 problem(s)"), "{report}");
        assert!(report.contains("duplicate beat number 1"), "{report}");
    }

    #[test]
    fn test_check_file_missing() {
        let err = check_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.starts_with("cannot read"));
    }
}
