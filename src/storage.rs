//! Local run-history store: one row per pipeline run plus per-stage
//! timings. The Backend Store stays authoritative for records and cards;
//! this is operator-side history only.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::pipeline::RunReport;

pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS runs (
                ts INTEGER NOT NULL,
                card_id TEXT NOT NULL,
                nb_value REAL NOT NULL,
                upper_bound REAL NOT NULL,
                lower_bound REAL NOT NULL,
                action TEXT NOT NULL,
                zone TEXT,
                progress REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stage_timings (
                ts INTEGER NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn persist_run(&mut self, report: &RunReport) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (ts, card_id, nb_value, upper_bound, lower_bound, action, zone, progress)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.ts,
                report.card_id,
                report.nb_value,
                report.upper_bound,
                report.lower_bound,
                report.action.as_str(),
                report.zone.map(|z| z.as_str()),
                report.progress
            ],
        )?;
        for (stage, status, duration) in &report.stages {
            tx.execute(
                "INSERT INTO stage_timings (ts, stage, status, duration_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    report.ts,
                    stage,
                    status.as_str(),
                    duration.map(|d| d.as_millis() as i64)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn run_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn stage_row_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM stage_timings", [], |row| row.get(0))?;
        Ok(count)
    }
}
