//! Nestable atomic units over a single SQLite connection.
//!
//! SQLite transactions cannot nest, so the first level uses BEGIN/COMMIT and
//! every level below it uses named save-points. All calls through the same
//! store observe one shared depth counter, which is what lets a full rebuild
//! hold one top-level transaction around many per-file units while an
//! incremental pass gives each file its own top-level transaction.

use std::cell::Cell;

use rusqlite::Connection;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct TransactionManager {
    depth: Cell<u32>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth. 0 means no transaction is open.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Runs `f` inside a transaction (depth 0) or a save-point (depth > 0).
    /// On error the unit is rolled back and the error propagated; the depth
    /// counter is restored either way.
    pub fn with<T>(&self, conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let depth = self.depth.get();
        if depth == 0 {
            conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            conn.execute_batch(&format!("SAVEPOINT sp_{depth}"))?;
        }
        self.depth.set(depth + 1);

        let result = f();
        self.depth.set(depth);

        match result {
            Ok(value) => {
                if depth == 0 {
                    conn.execute_batch("COMMIT")?;
                } else {
                    conn.execute_batch(&format!("RELEASE sp_{depth}"))?;
                }
                Ok(value)
            }
            Err(err) => {
                // Rollback failure is secondary to the original error.
                let rollback = if depth == 0 {
                    conn.execute_batch("ROLLBACK")
                } else {
                    conn.execute_batch(&format!("ROLLBACK TO sp_{depth}; RELEASE sp_{depth}"))
                };
                if let Err(rb) = rollback {
                    tracing::warn!(error = %rb, "rollback failed after transaction error");
                }
                Err(err)
            }
        }
    }
}
