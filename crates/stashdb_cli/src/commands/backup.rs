//! Snapshot dump and restore commands.

use stashdb_core::{export_json, import_json, Context, Database, ExportOptions};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Writes a snapshot to `output`, or to stdout when `None`.
pub fn dump(
    ctx: &Context,
    db: &Database,
    output: Option<&Path>,
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = ExportOptions::new().pretty(pretty);

    match output {
        Some(path) => {
            info!("Dumping database to {:?}", path);
            let file = fs::File::create(path)?;
            let mut writer = BufWriter::new(file);
            let entries = export_json(ctx, db, &mut writer, options)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

            eprintln!("✓ Snapshot written");
            eprintln!("  Path: {:?}", path);
            eprintln!("  Entries: {entries}");
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            export_json(ctx, db, &mut lock, options)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

/// Loads a snapshot file into `db` in one transaction.
pub fn restore(
    ctx: &Context,
    db: &Database,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring database from {:?}", input);
    let file = fs::File::open(input)?;
    let stats = import_json(ctx, db, io::BufReader::new(file))?;

    println!("✓ Snapshot restored");
    println!("  Entries: {}", stats.entries);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::Config;
    use tempfile::tempdir;

    #[test]
    fn dump_then_restore_via_files() {
        let dir = tempdir().unwrap();
        let ctx = Context::background();
        let snapshot = dir.path().join("snapshot.json");

        let source = Database::new(Config::new().path(dir.path().join("a")));
        source.start(&ctx).unwrap();
        source.run(&ctx, |tx| tx.set_typed("k", &[1, 2, 3])).unwrap();
        dump(&ctx, &source, Some(&snapshot), true).unwrap();

        let target = Database::new(Config::new().path(dir.path().join("b")));
        target.start(&ctx).unwrap();
        restore(&ctx, &target, &snapshot).unwrap();

        let value: Vec<i32> = target.view(&ctx, |tx| tx.get_typed("k")).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn restore_missing_file_fails() {
        let dir = tempdir().unwrap();
        let ctx = Context::background();
        let db = Database::in_memory();
        db.start(&ctx).unwrap();
        assert!(restore(&ctx, &db, &dir.path().join("absent.json")).is_err());
    }
}
