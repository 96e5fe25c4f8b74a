//! Explicit transaction scopes
//!
//! Each inbound message gets at most one [`Scope::Primary`] unit of work for
//! the write model and any number of [`Scope::SideEffect`] units for read
//! models. A side-effect unit is always begun after the primary one has
//! committed, so its failure cannot undo write-model state.

use kscope_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::fmt;
use tracing::debug;

/// Which transaction boundary a unit of work belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Write-model mutation for one message
    Primary,
    /// Read-model projection following a committed primary unit
    SideEffect,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Primary => f.write_str("primary"),
            Scope::SideEffect => f.write_str("side-effect"),
        }
    }
}

/// One open transaction; dropped without commit means rolled back
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    scope: Scope,
}

impl UnitOfWork {
    pub async fn begin(pool: &SqlitePool, scope: Scope) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self { tx, scope })
    }

    /// Connection to pass to repository functions
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        let scope = self.scope;
        self.tx.commit().await?;
        debug!(scope = %scope, "Unit of work committed");
        Ok(())
    }
}
