//! Demo command implementation.
//!
//! Each scenario runs against a fresh in-memory database with the
//! `accounts` table and records every step with its outcome.

use clap::ValueEnum;
use rowtx_core::{
    CoreError, CoreResult, Database, IsolationMode, Row, StatsSnapshot, TableId, TransactionId,
    Value,
};
use rowtx_testkit::{account, create_accounts_table};
use serde::Serialize;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Demonstration scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Writes of one transaction become visible together
    Atomicity,
    /// Duplicate keys and NULLs roll back the whole transaction
    Rollback,
    /// A locking writer blocks a second writer until commit
    Locking,
    /// Opposite-order updates end in exactly one deadlock victim
    Deadlock,
    /// A snapshot keeps reading its version after a newer commit
    Mvcc,
    /// Every scenario in order
    All,
}

impl Scenario {
    const EACH: [Scenario; 5] = [
        Scenario::Atomicity,
        Scenario::Rollback,
        Scenario::Locking,
        Scenario::Deadlock,
        Scenario::Mvcc,
    ];
}

impl Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::Atomicity => "atomicity",
            Scenario::Rollback => "rollback",
            Scenario::Locking => "locking",
            Scenario::Deadlock => "deadlock",
            Scenario::Mvcc => "mvcc",
            Scenario::All => "all",
        };
        f.write_str(name)
    }
}

/// One recorded step.
#[derive(Debug, Serialize)]
pub struct DemoStep {
    /// What was done.
    pub action: String,
    /// What happened.
    pub outcome: String,
    /// Whether the operation succeeded.
    pub ok: bool,
}

/// Result of one scenario.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Scenario name.
    pub scenario: Scenario,
    /// Steps in order.
    pub steps: Vec<DemoStep>,
    /// Database counters after the scenario.
    pub stats: StatsSnapshot,
}

#[derive(Default)]
struct Recorder {
    steps: Vec<DemoStep>,
}

impl Recorder {
    fn note(&mut self, action: impl Into<String>, outcome: impl Display) {
        self.steps.push(DemoStep {
            action: action.into(),
            outcome: outcome.to_string(),
            ok: true,
        });
    }

    fn record<T: Debug>(&mut self, action: impl Into<String>, result: &CoreResult<T>) {
        let (outcome, ok) = match result {
            Ok(value) => (format!("{value:?}"), true),
            Err(err) => (err.to_string(), false),
        };
        self.steps.push(DemoStep {
            action: action.into(),
            outcome,
            ok,
        });
    }
}

/// Runs the demo command.
pub fn run(scenario: Scenario, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let scenarios: Vec<Scenario> = match scenario {
        Scenario::All => Scenario::EACH.to_vec(),
        one => vec![one],
    };

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        info!(%scenario, "running scenario");
        reports.push(run_scenario(scenario)?);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        "text" => {
            for report in &reports {
                print_report(report);
            }
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }

    Ok(())
}

/// Runs one scenario against a fresh database.
pub fn run_scenario(scenario: Scenario) -> CoreResult<DemoReport> {
    let db = Arc::new(Database::in_memory());
    let accounts = create_accounts_table(&db)?;
    let mut rec = Recorder::default();

    match scenario {
        Scenario::Atomicity => atomicity(&db, accounts, &mut rec)?,
        Scenario::Rollback => rollback(&db, accounts, &mut rec)?,
        Scenario::Locking => locking(&db, accounts, &mut rec)?,
        Scenario::Deadlock => deadlock(&db, accounts, &mut rec)?,
        Scenario::Mvcc => mvcc(&db, accounts, &mut rec)?,
        Scenario::All => {}
    }

    Ok(DemoReport {
        scenario,
        steps: rec.steps,
        stats: db.stats(),
    })
}

fn print_report(report: &DemoReport) {
    println!("\n=== {} ===", report.scenario);
    for step in &report.steps {
        let mark = if step.ok { "ok " } else { "err" };
        println!("  [{mark}] {} -> {}", step.action, step.outcome);
    }
    let stats = &report.stats;
    println!(
        "  stats: committed={} aborted={} lock_waits={} deadlocks={} violations={}",
        stats.transactions_committed,
        stats.transactions_aborted,
        stats.lock_waits,
        stats.deadlocks,
        stats.constraint_violations
    );
}

fn describe(row: &Option<Row>) -> String {
    row.as_ref().map_or_else(|| "no row".to_string(), Row::to_string)
}

fn seed(db: &Database, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    let ts = db.transaction(IsolationMode::Locking, |txn| {
        txn.insert(accounts, account(1, "Ashish", 5000))?;
        txn.insert(accounts, account(2, "Ravi", 3000))?;
        Ok(())
    });
    rec.record("seed accounts 1 (Ashish, 5000) and 2 (Ravi, 3000)", &ts);
    ts
}

fn atomicity(db: &Database, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    let tx = db.begin(IsolationMode::Locking)?;
    rec.note("begin writer", tx);
    let r = db.insert(tx, accounts, account(1, "Ashish", 5000));
    rec.record("writer inserts account 1", &r);
    let r = db.insert(tx, accounts, account(2, "Ravi", 3000));
    rec.record("writer inserts account 2", &r);

    let observer = db.begin(IsolationMode::SnapshotMvcc)?;
    let rows = db.scan(observer, accounts)?;
    rec.note("snapshot reader scans before commit", format!("{} rows", rows.len()));

    let r = db.commit(tx);
    rec.record("writer commits", &r);

    let rows = db.scan(observer, accounts)?;
    rec.note("same snapshot scans after commit", format!("{} rows", rows.len()));
    db.commit(observer)?;

    let rows = db.transaction(IsolationMode::SnapshotMvcc, |txn| txn.scan(accounts))?;
    rec.note("new snapshot scans", format!("{} rows", rows.len()));
    Ok(())
}

fn rollback(db: &Database, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    seed(db, accounts, rec)?;

    let tx = db.begin(IsolationMode::Locking)?;
    let r = db.insert(tx, accounts, account(3, "Meera", 700));
    rec.record("tx inserts account 3", &r);
    let r = db.insert(tx, accounts, account(1, "Duplicate", 1));
    rec.record("tx inserts duplicate account 1", &r);
    rec.note("tx state", format!("{:?}", db.status(tx)));
    let r = db.commit(tx);
    rec.record("tx commits", &r);

    let tx = db.begin(IsolationMode::Locking)?;
    let r = db.update(tx, accounts, &Value::from(2), Row::new().with("amount", 2500));
    rec.record("tx updates account 2", &r);
    let r = db.insert(tx, accounts, Row::new().with("id", 4).with("amount", 10));
    rec.record("tx inserts account 4 without a name", &r);

    let rows = db.transaction(IsolationMode::SnapshotMvcc, |txn| txn.scan(accounts))?;
    for (_, row) in &rows {
        rec.note("committed row", row);
    }
    Ok(())
}

fn locking(db: &Arc<Database>, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    seed(db, accounts, rec)?;

    let first = db.begin(IsolationMode::Locking)?;
    let r = db.update(first, accounts, &Value::from(1), Row::new().with("amount", 6000));
    rec.record("first writer updates account 1", &r);

    let second = db.begin(IsolationMode::Locking)?;
    let waiter = {
        let db = Arc::clone(db);
        thread::spawn(move || {
            let row = db.read_for_update(second, accounts, &Value::from(1));
            let commit = db.commit(second);
            (row, commit)
        })
    };

    let start = Instant::now();
    while !db.lock_table().is_waiting(second) && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(1));
    }
    rec.note(
        "second writer requests account 1",
        if db.lock_table().is_waiting(second) {
            "blocked"
        } else {
            "not blocked"
        },
    );

    let r = db.commit(first);
    rec.record("first writer commits", &r);

    let (row, commit) = waiter
        .join()
        .unwrap_or_else(|_| (Ok(None), Ok(db.committed_ts())));
    match &row {
        Ok(row) => rec.note("second writer reads account 1 after wake-up", describe(row)),
        Err(err) => rec.note("second writer reads account 1 after wake-up", err),
    }
    rec.record("second writer commits", &commit);
    Ok(())
}

fn deadlock(db: &Arc<Database>, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    seed(db, accounts, rec)?;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [(1, 2), (2, 1)]
        .into_iter()
        .map(|(first, second)| {
            let db = Arc::clone(db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> CoreResult<TransactionId> {
                let tx = db.begin(IsolationMode::Locking)?;
                db.update(tx, accounts, &Value::from(first), Row::new().with("amount", 1))?;
                barrier.wait();
                db.update(tx, accounts, &Value::from(second), Row::new().with("amount", 2))?;
                db.commit(tx)?;
                Ok(tx)
            })
        })
        .collect();

    for (handle, order) in handles.into_iter().zip(["1 then 2", "2 then 1"]) {
        let result: CoreResult<_> = handle
            .join()
            .unwrap_or_else(|_| Err(CoreError::invalid_operation("thread panicked")));
        rec.record(format!("transaction locking {order}"), &result);
    }
    Ok(())
}

fn mvcc(db: &Database, accounts: TableId, rec: &mut Recorder) -> CoreResult<()> {
    let tx1 = db.begin(IsolationMode::Locking)?;
    db.insert(tx1, accounts, account(1, "Ashish", 5000))?;
    let r = db.commit(tx1);
    rec.record("Tx1 inserts Ashish with 5000 and commits", &r);

    let tx2 = db.begin(IsolationMode::SnapshotMvcc)?;
    let row = db.read(tx2, accounts, &Value::from(1))?;
    rec.note("Tx2 (mvcc) reads account 1", describe(&row));

    let tx3 = db.begin(IsolationMode::Locking)?;
    db.update(tx3, accounts, &Value::from(1), Row::new().with("amount", 6000))?;
    let r = db.commit(tx3);
    rec.record("Tx3 sets amount to 6000 and commits", &r);

    let row = db.read(tx2, accounts, &Value::from(1))?;
    rec.note("Tx2 re-reads account 1", describe(&row));
    db.commit(tx2)?;

    let tx4 = db.begin(IsolationMode::SnapshotMvcc)?;
    let row = db.read(tx4, accounts, &Value::from(1))?;
    rec.note("Tx4 (mvcc) reads account 1", describe(&row));
    db.commit(tx4)?;
    Ok(())
}
