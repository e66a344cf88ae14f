//! Single-key commands.

use stashdb_codec::validate_document;
use stashdb_core::{Context, CoreError, Database};
use std::io::Write;

/// Prints the stored JSON document for `key`.
pub fn get(
    ctx: &Context,
    db: &Database,
    key: &str,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = db
        .view(ctx, |tx| tx.get(key))?
        .ok_or_else(|| CoreError::key_not_found(key.as_bytes()))?;
    out.write_all(&value)?;
    writeln!(out)?;
    Ok(())
}

/// Stores `value`, which must be a JSON document.
pub fn set(
    ctx: &Context,
    db: &Database,
    key: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = value.trim();
    validate_document(value.as_bytes())
        .map_err(|e| format!("value for {key} is not JSON: {}", e.message()))?;
    db.run(ctx, |tx| tx.set(key, value))?;
    Ok(())
}

/// Removes `key`. Returns whether it existed.
pub fn delete(ctx: &Context, db: &Database, key: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let existed = db.run(ctx, |tx| {
        let existed = tx.contains(key)?;
        tx.delete(key)?;
        Ok(existed)
    })?;
    Ok(existed)
}

/// Prints every key, one per line.
pub fn list(
    ctx: &Context,
    db: &Database,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    for entry in db.dump(ctx)? {
        writeln!(out, "{}", String::from_utf8_lossy(&entry.key))?;
    }
    Ok(())
}
