//! Benchmark utilities.

use livesync_store::{MemoryStore, Record, RecordStore, StoreResult};
use livesync_testkit::{education, employee, hr_store};

/// An employee with `rows` education rows.
pub fn employee_with_rows(index: usize, rows: usize) -> Record {
    (0..rows).fold(
        employee(
            &format!("EMP-{index:05}"),
            &format!("Employee {index}"),
            &format!("user{index:05}"),
        )
        .with_field("personal_email", format!("user{index}@example.com"))
        .with_field("cell_number", format!("555-{index:04}")),
        |record, row| {
            record.with_row(
                "education",
                education(&format!("School {row}"), "BSc", 1990 + row as i64),
            )
        },
    )
}

/// An HR store holding `count` employees, none synced yet.
pub fn populated_store(count: usize, rows: usize) -> StoreResult<MemoryStore> {
    let store = hr_store();
    for index in 0..count {
        store.create(&mut employee_with_rows(index, rows))?;
    }
    Ok(store)
}
