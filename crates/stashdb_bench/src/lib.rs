//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use stashdb_core::{Context, Database};

/// A typed value shaped like application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Free text.
    pub title: String,
    /// Recently seen identifiers.
    pub ids: Vec<u64>,
    /// A measurement.
    pub score: f64,
    /// Flag.
    pub active: bool,
}

/// Generates a record whose title is `title_len` characters long.
pub fn random_record(title_len: usize) -> Record {
    let mut rng = rand::thread_rng();
    Record {
        title: (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(title_len)
            .map(char::from)
            .collect(),
        ids: (0..8).map(|_| rng.gen()).collect(),
        score: rng.gen_range(-1000.0..1000.0),
        active: rng.gen(),
    }
}

/// Starts an in-memory database holding `count` records under `key:<n>`.
pub fn populated(count: usize) -> (Database, Context) {
    let db = Database::in_memory();
    let ctx = Context::background();
    db.start(&ctx).unwrap();
    db.run(&ctx, |tx| {
        for i in 0..count {
            tx.set_typed(format!("key:{i:06}"), &random_record(32))?;
        }
        Ok(())
    })
    .unwrap();
    (db, ctx)
}
