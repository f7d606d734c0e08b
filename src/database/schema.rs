/// Bumped whenever `CURRENT_SCHEMA` changes shape.
pub const SCHEMA_VERSION: i64 = 1;

pub const CURRENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS centers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    retired BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL DEFAULT '',
    full_name TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL CHECK (role IN ('super_admin', 'club_manager', 'head_coach', 'coach', 'center_manager')),
    center_id INTEGER,
    FOREIGN KEY (center_id) REFERENCES centers (id)
);

CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    coach_id INTEGER,
    center_id INTEGER NOT NULL,
    start_time TEXT,
    end_time TEXT,
    FOREIGN KEY (coach_id) REFERENCES users (id),
    FOREIGN KEY (center_id) REFERENCES centers (id)
);

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY,
    full_name TEXT NOT NULL,
    age INTEGER NOT NULL,
    batch_id INTEGER NOT NULL,
    center_id INTEGER NOT NULL,
    parent_name TEXT NOT NULL DEFAULT '',
    parent_phone TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (batch_id) REFERENCES batches (id),
    FOREIGN KEY (center_id) REFERENCES centers (id)
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY,
    student_id INTEGER NOT NULL,
    batch_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('present', 'absent')),
    marked_by INTEGER NOT NULL,
    marked_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    center_id INTEGER NOT NULL,
    FOREIGN KEY (student_id) REFERENCES students (id) ON DELETE CASCADE,
    FOREIGN KEY (batch_id) REFERENCES batches (id),
    FOREIGN KEY (marked_by) REFERENCES users (id),
    FOREIGN KEY (center_id) REFERENCES centers (id)
);

CREATE UNIQUE INDEX IF NOT EXISTS attendance_student_batch_date
    ON attendance (student_id, batch_id, date);

CREATE INDEX IF NOT EXISTS attendance_center_date ON attendance (center_id, date);

CREATE TABLE IF NOT EXISTS fee_payments (
    id INTEGER PRIMARY KEY,
    student_id INTEGER NOT NULL,
    amount REAL NOT NULL CHECK (amount > 0),
    payment_date TIMESTAMP,
    payment_mode TEXT,
    status TEXT NOT NULL CHECK (status IN ('paid', 'due', 'overdue')),
    due_date TEXT,
    receipt_number TEXT UNIQUE,
    center_id INTEGER NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CHECK (status != 'paid' OR (payment_date IS NOT NULL AND payment_mode IS NOT NULL)),
    FOREIGN KEY (student_id) REFERENCES students (id) ON DELETE CASCADE,
    FOREIGN KEY (center_id) REFERENCES centers (id)
);

CREATE INDEX IF NOT EXISTS fee_payments_center_status ON fee_payments (center_id, status);

CREATE TABLE IF NOT EXISTS user_sessions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
);
"#;

pub const EXPECTED_TABLES: [&str; 7] = [
    "centers",
    "users",
    "batches",
    "students",
    "attendance",
    "fee_payments",
    "user_sessions",
];
